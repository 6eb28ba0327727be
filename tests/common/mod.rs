//! Shared fixtures for the integration tests.
#![allow(dead_code, reason = "each test binary uses a subset of the fixtures")]

pub mod api_server;

use image_registry_operator::crd::{Config, ConfigSpec};

/// Config named `cluster` parsed from a spec in YAML
pub fn config(spec_yaml: &str) -> Config {
    let spec: ConfigSpec = serde_yaml::from_str(spec_yaml).expect("spec should parse");
    Config::new("cluster", spec)
}
