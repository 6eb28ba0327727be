//! # Mutators
//!
//! One [`Mutator`] per managed kind. Each computes its desired object from
//! the Config and the shared [`Parameters`], and merges only the fields it
//! owns into the live object.
//!
//! [`ResourceMutator`] is the closed set the generator iterates over, in the
//! order the objects depend on each other.

mod cluster_operator;
mod config_maps;
mod deployment;
pub mod pod_template;
mod rbac;
mod route;
mod secret;
mod service;
mod service_account;

pub use cluster_operator::{ClusterOperatorMutator, StatusReport};
pub use config_maps::{CertificatesMutator, ServiceCaMutator};
pub use deployment::DeploymentMutator;
pub use rbac::{ClusterRoleBindingMutator, ClusterRoleMutator};
pub use route::RouteMutator;
pub use secret::{PrivateConfigurationMutator, HTTP_SECRET_KEY};
pub use service::ServiceMutator;
pub use service_account::ServiceAccountMutator;

use crate::config::Parameters;
use crate::controller::apply::{self, ApplyOutcome, Mutator};
use crate::controller::backoff::ConflictBackoff;
use crate::controller::object;
use crate::error::Result;
use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Everything a mutator needs besides the Config
#[derive(Clone)]
pub struct MutatorContext {
    pub client: Client,
    pub params: Arc<Parameters>,
    /// Controller reference to the Config
    pub owner: OwnerReference,
}

impl std::fmt::Debug for MutatorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutatorContext")
            .field("namespace", &self.params.namespace)
            .field("owner", &self.owner.name)
            .finish_non_exhaustive()
    }
}

impl MutatorContext {
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.params.namespace
    }

    /// Metadata of an owned object in the operator namespace
    #[must_use]
    pub fn namespaced_meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace().to_string()),
            owner_references: Some(vec![self.owner.clone()]),
            ..ObjectMeta::default()
        }
    }

    /// Metadata of an owned cluster-scoped object
    #[must_use]
    pub fn cluster_meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            owner_references: Some(vec![self.owner.clone()]),
            ..ObjectMeta::default()
        }
    }
}

/// What the storage driver adds to the registry deployment
#[derive(Debug, Clone, Default)]
pub struct StorageContribution {
    pub storage_type: String,
    pub env: Vec<EnvVar>,
    pub volumes: Vec<(Volume, VolumeMount)>,
    pub secrets: BTreeMap<String, String>,
}

impl StorageContribution {
    pub fn from_driver<D>(driver: &D) -> Self
    where
        D: crate::storage::StorageDriver + ?Sized,
    {
        Self {
            storage_type: driver.storage_type().to_string(),
            env: driver.config_env(),
            volumes: driver.volumes(),
            secrets: driver.secrets(),
        }
    }
}

/// Typed handle on one named object
pub(crate) struct Target<K> {
    api: Api<K>,
    name: String,
}

impl<K> Debug for Target<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target").field("name", &self.name).finish()
    }
}

impl<K> Target<K>
where
    K: Resource + Clone + Debug + DeserializeOwned + Serialize,
{
    pub(crate) fn new(api: Api<K>, name: impl Into<String>) -> Self {
        Self {
            api,
            name: name.into(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn get(&self) -> Result<K> {
        Ok(self.api.get(&self.name).await?)
    }

    pub(crate) async fn create(&self, obj: &K) -> Result<K> {
        Ok(self.api.create(&PostParams::default(), obj).await?)
    }

    pub(crate) async fn replace(&self, obj: &K) -> Result<K> {
        Ok(self.api.replace(&self.name, &PostParams::default(), obj).await?)
    }

    pub(crate) async fn delete(&self, params: &DeleteParams) -> Result<()> {
        self.api.delete(&self.name, params).await?;
        Ok(())
    }
}

/// Checksum fast path shared by the checksum-carrying kinds.
///
/// When `current` already carries the checksum of `desired`, nothing is
/// written. Otherwise the desired metadata (with the new checksum) is merged
/// into `current` and `merge_spec` copies the owned spec fields.
pub(crate) fn merge_checksummed<K, F>(mut current: K, desired: &K, merge_spec: F) -> Result<Option<K>>
where
    K: Resource + Serialize,
    F: FnOnce(&mut K, &K),
{
    let digest = object::checksum(desired)?;
    if object::has_checksum(current.meta(), &digest) {
        return Ok(None);
    }
    let mut required = desired.meta().clone();
    object::set_checksum(&mut required, &digest);
    object::merge_object_meta(current.meta_mut(), &required);
    merge_spec(&mut current, desired);
    Ok(Some(current))
}

/// Closed set of managed kinds, in apply order
#[derive(Debug)]
pub enum ResourceMutator {
    ClusterRole(ClusterRoleMutator),
    ClusterRoleBinding(ClusterRoleBindingMutator),
    ServiceAccount(ServiceAccountMutator),
    ServiceCa(ServiceCaMutator),
    Certificates(CertificatesMutator),
    PrivateConfiguration(PrivateConfigurationMutator),
    Service(ServiceMutator),
    Deployment(DeploymentMutator),
    Route(RouteMutator),
    ClusterOperator(ClusterOperatorMutator),
}

macro_rules! dispatch {
    ($self:ident, $m:ident => $call:expr) => {
        match $self {
            ResourceMutator::ClusterRole($m) => $call,
            ResourceMutator::ClusterRoleBinding($m) => $call,
            ResourceMutator::ServiceAccount($m) => $call,
            ResourceMutator::ServiceCa($m) => $call,
            ResourceMutator::Certificates($m) => $call,
            ResourceMutator::PrivateConfiguration($m) => $call,
            ResourceMutator::Service($m) => $call,
            ResourceMutator::Deployment($m) => $call,
            ResourceMutator::Route($m) => $call,
            ResourceMutator::ClusterOperator($m) => $call,
        }
    };
}

impl ResourceMutator {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        dispatch!(self, m => m.kind())
    }

    #[must_use]
    pub fn name(&self) -> String {
        dispatch!(self, m => m.name())
    }

    #[must_use]
    pub fn owned(&self) -> bool {
        dispatch!(self, m => m.owned())
    }

    pub async fn apply(&self, backoff: &ConflictBackoff) -> Result<ApplyOutcome> {
        dispatch!(self, m => apply::apply(m, backoff).await)
    }

    pub async fn delete(&self, params: &DeleteParams, backoff: &ConflictBackoff) -> Result<()> {
        dispatch!(self, m => apply::delete(m, params, backoff).await)
    }
}

/// Context against an unreachable API server; must run inside a tokio runtime
#[cfg(test)]
pub(crate) fn test_context() -> MutatorContext {
    use crate::config::ControllerConfig;

    // Same provider the operator installs at startup
    let _ = rustls::crypto::ring::default_provider().install_default();
    let config = kube::Config::new("http://127.0.0.1:6443".parse().expect("valid url"));
    let client = Client::try_from(config).expect("client");
    MutatorContext {
        client,
        params: Arc::new(Parameters::new(&ControllerConfig::default())),
        owner: OwnerReference {
            api_version: "imageregistry.operator.openshift.io/v1".to_string(),
            kind: "Config".to_string(),
            name: "cluster".to_string(),
            uid: "config-uid".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        },
    }
}
