//! # Custom Resource Definitions
//!
//! CRD types for the Dockhand Secrets Operator (`dhs.dockhand.dev/v1alpha2`).
//!
//! ## Module Structure
//!
//! - `secret.rs` - `Secret` kind (the DockhandSecret) and its spec
//! - `profile.rs` - `Profile` kind with per-backend configuration blocks
//! - `status.rs` - DockhandSecret status and lifecycle states

mod profile;
mod secret;
mod status;

pub use profile::{
    AwsSecretsManagerProfile, AzureKeyVaultProfile, DockhandProfile, GcpSecretsManagerProfile,
    ProfileSpec, SecretRef, VaultProfile,
};
pub use secret::{
    DockhandSecret, DockhandSecretSpec, ProfileRef, SecretSpec, default_secret_type,
};
pub use status::{DockhandSecretStatus, SecretState};
