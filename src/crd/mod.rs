//! # Custom Resource Definitions
//!
//! Resource types used by the operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - The registry Config resource and its storage union
//! - `status.rs` - Config status and the shared condition type
//! - `cluster_operator.rs` - `config.openshift.io` ClusterOperator
//! - `route.rs` - `route.openshift.io` Route

mod cluster_operator;
mod route;
mod spec;
mod status;

pub use cluster_operator::{
    ClusterOperator, ClusterOperatorSpec, ClusterOperatorStatus, OperandVersion, RelatedObject,
};
pub use route::{Route, RoutePort, RouteSpec, RouteTargetReference, TlsConfig};
pub use spec::{
    AzureStorage, ClaimSource, Config, ConfigSpec, EmptyDirSource, FilesystemStorage, GcsStorage,
    HostPathSource, ManagementState, RegistryRoute, RequestLimit, RequestLimits, S3Storage,
    StorageSpec, StorageType, SwiftStorage,
};
pub use status::{condition_types, Condition, ConditionStatus, ConfigStatus};
