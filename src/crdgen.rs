//! # CRD Generator
//!
//! Generates the Kubernetes CustomResourceDefinition YAML of `SecretDefinition`.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/secretdefinition.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use secrets_manager::crd::SecretDefinition;

fn main() {
    let crd = SecretDefinition::crd();

    match serde_yaml::to_string(&crd) {
        Ok(yaml) => {
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
