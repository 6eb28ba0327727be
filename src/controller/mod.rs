//! # Controller
//!
//! Core controller modules for the image registry operator.
//!
//! - `apply`: Get-or-create / merge-and-replace engine shared by every managed kind
//! - `backoff`: Conflict retry and Fibonacci requeue backoff
//! - `bootstrap`: Start-up creation of the default Config and ClusterOperator
//! - `conditions`: Status condition updates and deployment health axes
//! - `generator`: Ordered apply/remove passes over the registry objects
//! - `mutators`: Desired state and field ownership per managed kind
//! - `object`: Checksums, owner references and metadata merging
//! - `reconciler`: Config event handling
//! - `routes`: Desired routes and collection of obsolete ones

pub mod apply;
pub mod backoff;
pub mod bootstrap;
pub mod conditions;
pub mod generator;
pub mod mutators;
pub mod object;
pub mod reconciler;
pub mod routes;
