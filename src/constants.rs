//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! Durations and ports are defaults; `ControllerConfig::from_env` can
//! override them.

/// API group of the registry Config resource
pub const OPERATOR_GROUP: &str = "imageregistry.operator.openshift.io";

/// Name of the singleton Config resource
pub const CONFIG_RESOURCE_NAME: &str = "cluster";

/// Annotation holding the content checksum of the desired object
pub const CHECKSUM_ANNOTATION: &str = "imageregistry.operator.openshift.io/checksum";

/// Finalizer guarding storage teardown
pub const FINALIZER: &str = "imageregistry.operator.openshift.io/finalizer";

/// Marker annotation set on every route the operator creates
pub const ROUTE_OWNER_ANNOTATION: &str = "imageregistry.openshift.io";

/// Pod template annotation carrying the private configuration checksum
pub const SECRET_CHECKSUM_ANNOTATION: &str = "imageregistry.operator.openshift.io/secret-checksum";

/// Pod template annotation carrying the trusted certificates checksum
pub const CERTIFICATES_CHECKSUM_ANNOTATION: &str =
    "imageregistry.operator.openshift.io/certificates-checksum";

/// Annotation requesting a serving certificate from the service CA
pub const SERVING_CERT_ANNOTATION: &str = "service.beta.openshift.io/serving-cert-secret-name";

/// Annotation requesting CA bundle injection into a config map
pub const INJECT_CABUNDLE_ANNOTATION: &str = "service.beta.openshift.io/inject-cabundle";

/// Namespace annotation listing the supplemental group range
pub const SUPPLEMENTAL_GROUPS_ANNOTATION: &str = "openshift.io/sa.scc.supplemental-groups";

/// Default namespace for the operator and the registry
pub const DEFAULT_NAMESPACE: &str = "openshift-image-registry";

/// Default ClusterOperator name
pub const DEFAULT_OPERATOR_NAME: &str = "image-registry";

/// Default registry image used when the Config does not name one
pub const DEFAULT_REGISTRY_IMAGE: &str = "quay.io/openshift/origin-docker-registry:latest";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 60000;

/// Default periodic resync interval (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 600;

/// Conflict retry: maximum attempts per mutator
pub const DEFAULT_CONFLICT_RETRY_STEPS: u32 = 4;

/// Conflict retry: initial delay (milliseconds)
pub const DEFAULT_CONFLICT_RETRY_BASE_MS: u64 = 10;

/// Conflict retry: delay multiplier between attempts
pub const DEFAULT_CONFLICT_RETRY_FACTOR: u32 = 5;

/// Interval between storage removal attempts (seconds)
pub const DEFAULT_STORAGE_REMOVAL_INTERVAL_SECS: u64 = 1;

/// Upper bound for storage removal (seconds)
pub const DEFAULT_STORAGE_REMOVAL_TIMEOUT_SECS: u64 = 300;

/// Minimum requeue delay after a failed reconcile (seconds)
pub const DEFAULT_ERROR_BACKOFF_MIN_SECS: u64 = 5;

/// Maximum requeue delay after a failed reconcile (seconds)
pub const DEFAULT_ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Delay before restarting the watch after a stream error or end (seconds)
pub const WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Initial back-off when the API server throttles the watch (milliseconds)
pub const WATCH_BACKOFF_START_MS: u64 = 1_000;

/// Largest back-off when the API server throttles the watch (milliseconds)
pub const WATCH_BACKOFF_MAX_MS: u64 = 30_000;

/// Time allowed for the metrics server to bind at start-up (seconds)
pub const SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Poll interval while waiting for the metrics server (milliseconds)
pub const SERVER_POLL_INTERVAL_MS: u64 = 50;
