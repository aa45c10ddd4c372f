//! # DockhandSecret Status

use serde::{Deserialize, Serialize};

/// Lifecycle state of a DockhandSecret
///
/// `Pending` while a new generation is being processed, `Ready` once the output
/// Secret matches the spec, `ErrApplied` when the last pass failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum SecretState {
    Pending,
    Ready,
    ErrApplied,
}

impl std::fmt::Display for SecretState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SecretState::Pending => "Pending",
            SecretState::Ready => "Ready",
            SecretState::ErrApplied => "ErrApplied",
        };
        f.write_str(s)
    }
}

/// Status of the DockhandSecret resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DockhandSecretStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SecretState>,
    /// Generation the output Secret was last rendered from (only stamped when Ready)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Retained for API compatibility; never written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_annotation_checksum: Option<String>,
    /// resourceVersion of the output Secret after the last successful write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_secret_resource_version: Option<String>,
    /// RFC3339 time of the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_timestamp: Option<String>,
}

impl DockhandSecretStatus {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == Some(SecretState::Ready)
    }
}
