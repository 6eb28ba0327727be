//! # Prelude
//!
//! Re-exports the types most callers need.
//!
//! ```rust
//! use image_registry_operator::prelude::*;
//! ```

pub use crate::crd::*;

pub use crate::config::{ControllerConfig, Parameters};
pub use crate::controller::apply::{ApplyOutcome, Mutator};
pub use crate::controller::generator::{ApplyReport, Generator};
pub use crate::controller::reconciler::{reconcile, BackoffState, Reconciler};
pub use crate::error::{Error, Result};
pub use crate::storage::{ConfigState, RemoveStorageError, StorageDriver};
