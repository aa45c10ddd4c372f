//! # CRD Generator
//!
//! Prints the `Secret` and `Profile` CustomResourceDefinitions of the
//! `dhs.dockhand.dev` group as a multi-document YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/dhs.dockhand.dev.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use dockhand_secrets_operator::crd::{DockhandProfile, DockhandSecret};
use kube::core::CustomResourceExt;

fn main() {
    for crd in [DockhandSecret::crd(), DockhandProfile::crd()] {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => print!("---\n{yaml}"),
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
