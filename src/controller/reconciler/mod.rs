//! # Reconciler
//!
//! Drives the generator from Config events.
//!
//! ## Module Structure
//!
//! - `types.rs` - Shared reconciler state and per-Config backoff
//! - `reconcile.rs` - Management state dispatch and deletion handling
//! - `status.rs` - Config status computation and write
//! - `finalizer.rs` - Finalizer guarding storage teardown

pub mod finalizer;
pub mod reconcile;
pub mod status;
pub mod types;

pub use reconcile::reconcile;
pub use types::{BackoffState, Reconciler};
