//! Image Registry Operator Library
//!
//! Reconciles the cluster image registry: its storage backend, the objects
//! that run it and the status it reports.
//!
//! ## Quick Start
//!
//! ```rust
//! use image_registry_operator::prelude::*;
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod error;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
pub mod storage;
