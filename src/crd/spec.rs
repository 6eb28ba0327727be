//! # Config Spec
//!
//! The registry Config custom resource and its storage backend union.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Config Custom Resource Definition
///
/// Declares how the cluster image registry is deployed. A single instance
/// named `cluster` is reconciled.
///
/// # Example
///
/// ```yaml
/// apiVersion: imageregistry.operator.openshift.io/v1
/// kind: Config
/// metadata:
///   name: cluster
/// spec:
///   managementState: Managed
///   replicas: 2
///   defaultRoute: true
///   storage:
///     s3:
///       bucket: my-registry-bucket
///       region: us-east-1
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Config",
    group = "imageregistry.operator.openshift.io",
    version = "v1",
    status = "crate::crd::ConfigStatus",
    shortname = "irc",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".spec.managementState"}, {"name":"Hostname", "type":"string", "jsonPath":".status.internalRegistryHostname"}, {"name":"Available", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    /// Whether the operator manages, removes or ignores the registry
    #[serde(default)]
    pub management_state: ManagementState,
    /// Storage backend; exactly one variant must be set
    #[serde(default)]
    pub storage: StorageSpec,
    /// Additional externally exposed routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RegistryRoute>,
    /// Expose the registry through a route with a router-generated hostname
    #[serde(default)]
    pub default_route: bool,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    /// Serve the registry over TLS with a certificate issued by the service CA
    #[serde(default = "default_true")]
    pub tls: bool,
    /// Secret used by the registry to sign upload state; generated when empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_secret: String,
    /// Registry log verbosity: 0 error, 1 warn, 2-3 info, anything higher debug
    #[serde(default = "default_logging")]
    pub logging: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<RequestLimits>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Registry image; the operator default is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

fn default_replicas() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_logging() -> i64 {
    2
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema,
)]
pub enum ManagementState {
    #[default]
    Managed,
    Removed,
    Unmanaged,
}

impl fmt::Display for ManagementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Managed => "Managed",
            Self::Removed => "Removed",
            Self::Unmanaged => "Unmanaged",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRoute {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Secret with `tls.crt`, `tls.key` and optionally `ca.crt` for the route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

/// Request throttling applied by the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<RequestLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<RequestLimit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestLimit {
    #[serde(default)]
    pub max_running: i32,
    #[serde(default)]
    pub max_in_queue: i32,
    /// Duration string such as `30s`; empty disables the limit
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_wait_in_queue: String,
}

/// Storage backend union
///
/// Also used in the status to record the resolved backend identity, with
/// generated bucket and container names filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemStorage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Storage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsStorage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureStorage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swift: Option<SwiftStorage>,
}

impl StorageSpec {
    /// Backend variants that are populated, in declaration order
    #[must_use]
    pub fn configured(&self) -> Vec<StorageType> {
        let mut types = Vec::new();
        if self.filesystem.is_some() {
            types.push(StorageType::Filesystem);
        }
        if self.s3.is_some() {
            types.push(StorageType::S3);
        }
        if self.gcs.is_some() {
            types.push(StorageType::Gcs);
        }
        if self.azure.is_some() {
            types.push(StorageType::Azure);
        }
        if self.swift.is_some() {
            types.push(StorageType::Swift);
        }
        types
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configured().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Filesystem,
    S3,
    Gcs,
    Azure,
    Swift,
}

impl StorageType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::S3 => "s3",
            Self::Gcs => "gcs",
            Self::Azure => "azure",
            Self::Swift => "swift",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local volume storage. Exactly one volume source must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemStorage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<ClaimSource>,
    /// Accepted by the schema so it can be rejected with a clear message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDirSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSource {
    pub claim_name: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostPathSource {
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3Storage {
    /// Generated as `image-registry-<region>-<uuid>` when empty
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    /// Custom endpoint for S3-compatible services
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region_endpoint: String,
    #[serde(default)]
    pub encrypt: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcsStorage {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, rename = "projectID")]
    pub project_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureStorage {
    pub account_name: String,
    #[serde(default)]
    pub container: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SwiftStorage {
    #[serde(rename = "authURL")]
    pub auth_url: String,
    #[serde(default)]
    pub container: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenant: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region_name: String,
}
