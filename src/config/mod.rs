//! # Configuration
//!
//! Environment-driven operator settings and the fixed registry topology.

pub mod controller;
pub mod parameters;

pub use controller::ControllerConfig;
pub use parameters::Parameters;
