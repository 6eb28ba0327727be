//! # CRD Generator
//!
//! Prints the registry Config CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/imageregistry.operator.openshift.io_configs.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use image_registry_operator::crd::Config;
use kube::core::CustomResourceExt;

fn main() {
    match serde_yaml::to_string(&Config::crd()) {
        Ok(yaml) => print!("{yaml}"),
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
