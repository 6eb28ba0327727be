//! # Storage
//!
//! Pluggable storage backends for the registry.
//!
//! Every backend implements [`StorageDriver`]: it validates its part of the
//! Config, tells whether the backend identity changed since the last applied
//! snapshot, checks for and creates the remote bucket or container, tears it
//! down, and contributes environment, volumes and credentials to the registry
//! deployment.
//!
//! [`Driver`] is the closed set of backends; the variant is selected from the
//! single populated field of the storage union.

pub mod azure;
pub mod credentials;
pub mod filesystem;
pub mod gcs;
mod rest;
pub mod s3;
pub mod state;
pub mod swift;

pub use credentials::Credentials;
pub use state::ConfigState;

use crate::crd::{Config, StorageSpec, StorageType};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, SecretKeySelector, Volume, VolumeMount,
};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Outcome of a failed teardown attempt
#[derive(Debug, Error)]
pub enum RemoveStorageError {
    /// Worth another attempt: throttling, network, non-empty container
    #[error("{0:#}")]
    Retriable(anyhow::Error),
    /// Cannot succeed without intervention: access denied, bad credentials
    #[error("{0:#}")]
    Terminal(anyhow::Error),
}

#[async_trait]
pub trait StorageDriver: Send + Sync {
    fn storage_type(&self) -> StorageType;

    /// Backend identity with generated names filled in
    fn resolved(&self) -> StorageSpec;

    /// Structural checks that need no remote calls
    fn validate_configuration(&self, previous: &ConfigState) -> Result<()>;

    /// Whether the backend type or its identifying fields differ from the snapshot
    fn storage_changed(&self, previous: &ConfigState) -> bool;

    async fn storage_exists(&self, cr: &Config) -> Result<bool>;

    /// Create the bucket or container. Returns whether it was created by
    /// this call; an existing target owned by the caller is a success.
    async fn create_storage(&self, cr: &Config) -> Result<bool>;

    /// Delete the bucket or container if the operator manages it
    async fn remove_storage(&self, cr: &Config) -> Result<(), RemoveStorageError>;

    /// Registry environment describing the backend
    fn config_env(&self) -> Vec<EnvVar>;

    fn volumes(&self) -> Vec<(Volume, VolumeMount)>;

    /// Entries for the private configuration secret
    fn secrets(&self) -> BTreeMap<String, String>;
}

/// What a storage driver needs from the cluster
#[derive(Clone)]
pub struct StorageContext {
    pub client: Client,
    pub namespace: String,
    /// Operator-owned secret the deployment reads credentials from
    pub secret_name: String,
    pub credentials: Credentials,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("namespace", &self.namespace)
            .field("secret_name", &self.secret_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Driver {
    Filesystem(filesystem::FilesystemDriver),
    S3(s3::S3Driver),
    Gcs(gcs::GcsDriver),
    Azure(azure::AzureDriver),
    Swift(swift::SwiftDriver),
}

/// The single populated backend of the storage union
pub fn select_backend(storage: &StorageSpec) -> Result<StorageType> {
    match storage.configured().as_slice() {
        [only] => Ok(*only),
        [] => Err(Error::configuration(
            "storage backend not configured: exactly one of filesystem, s3, gcs, azure or swift must be set",
        )),
        many => Err(Error::configuration(format!(
            "exactly one storage backend must be configured, found {}: {}",
            many.len(),
            many.iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

impl Driver {
    /// Build the driver for the backend selected in `storage`
    ///
    /// Empty bucket or container names are taken from `previous` when it
    /// describes the same backend, and generated otherwise.
    pub fn new(storage: &StorageSpec, previous: &ConfigState, ctx: StorageContext) -> Result<Self> {
        let driver = match select_backend(storage)? {
            StorageType::Filesystem => Self::Filesystem(filesystem::FilesystemDriver::new(
                storage.filesystem.clone().unwrap_or_default(),
                &ctx,
            )),
            StorageType::S3 => Self::S3(s3::S3Driver::new(
                storage.s3.clone().unwrap_or_default(),
                previous,
                ctx.credentials,
                ctx.secret_name,
            )),
            StorageType::Gcs => Self::Gcs(gcs::GcsDriver::new(
                storage.gcs.clone().unwrap_or_default(),
                previous,
                ctx.credentials,
                ctx.secret_name,
            )),
            StorageType::Azure => Self::Azure(azure::AzureDriver::new(
                storage.azure.clone().unwrap_or_default(),
                previous,
                ctx.credentials,
                ctx.secret_name,
            )),
            StorageType::Swift => Self::Swift(swift::SwiftDriver::new(
                storage.swift.clone().unwrap_or_default(),
                previous,
                ctx.credentials,
                ctx.secret_name,
            )),
        };
        Ok(driver)
    }

    /// Driver for the backend recorded in a snapshot, used for teardown
    pub fn from_state(state: &ConfigState, ctx: StorageContext) -> Result<Option<Self>> {
        if state.storage.is_empty() {
            return Ok(None);
        }
        Self::new(&state.storage, state, ctx).map(Some)
    }
}

macro_rules! delegate {
    ($self:ident, $d:ident => $call:expr) => {
        match $self {
            Driver::Filesystem($d) => $call,
            Driver::S3($d) => $call,
            Driver::Gcs($d) => $call,
            Driver::Azure($d) => $call,
            Driver::Swift($d) => $call,
        }
    };
}

#[async_trait]
impl StorageDriver for Driver {
    fn storage_type(&self) -> StorageType {
        delegate!(self, d => d.storage_type())
    }

    fn resolved(&self) -> StorageSpec {
        delegate!(self, d => d.resolved())
    }

    fn validate_configuration(&self, previous: &ConfigState) -> Result<()> {
        delegate!(self, d => d.validate_configuration(previous))
    }

    fn storage_changed(&self, previous: &ConfigState) -> bool {
        delegate!(self, d => d.storage_changed(previous))
    }

    async fn storage_exists(&self, cr: &Config) -> Result<bool> {
        delegate!(self, d => d.storage_exists(cr).await)
    }

    async fn create_storage(&self, cr: &Config) -> Result<bool> {
        delegate!(self, d => d.create_storage(cr).await)
    }

    async fn remove_storage(&self, cr: &Config) -> Result<(), RemoveStorageError> {
        delegate!(self, d => d.remove_storage(cr).await)
    }

    fn config_env(&self) -> Vec<EnvVar> {
        delegate!(self, d => d.config_env())
    }

    fn volumes(&self) -> Vec<(Volume, VolumeMount)> {
        delegate!(self, d => d.volumes())
    }

    fn secrets(&self) -> BTreeMap<String, String> {
        delegate!(self, d => d.secrets())
    }
}

/// Bring the remote storage in line with the Config and return the snapshot
/// to persist once the rest of the pass succeeds.
pub async fn sync_storage<D>(driver: &D, cr: &Config, previous: &ConfigState) -> Result<ConfigState>
where
    D: StorageDriver + ?Sized,
{
    driver.validate_configuration(previous)?;

    let changed = driver.storage_changed(previous);
    let recreate = if changed {
        info!(
            backend = %driver.storage_type(),
            "storage configuration changed, creating storage"
        );
        true
    } else if driver.storage_exists(cr).await? {
        false
    } else {
        info!(backend = %driver.storage_type(), "storage does not exist, creating it");
        true
    };

    let storage_managed = if recreate {
        let created = driver.create_storage(cr).await?;
        created || (!changed && previous.storage_managed)
    } else {
        previous.storage_managed
    };

    Ok(ConfigState {
        storage: driver.resolved(),
        storage_managed,
    })
}

/// Poll `remove_storage` every `interval` until it succeeds, fails
/// terminally, or `timeout` elapses. An attempt still running at the
/// deadline is abandoned.
pub async fn remove_storage_with_retry<D>(
    driver: &D,
    cr: &Config,
    interval: Duration,
    timeout: Duration,
) -> Result<()>
where
    D: StorageDriver + ?Sized,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let Ok(result) = tokio::time::timeout_at(deadline, driver.remove_storage(cr)).await else {
            return Err(Error::StorageRemoval(format!(
                "gave up after {attempts} attempts: no result within {}s",
                timeout.as_secs()
            )));
        };
        match result {
            Ok(()) => {
                info!(backend = %driver.storage_type(), attempts, "storage removed");
                return Ok(());
            }
            Err(RemoveStorageError::Terminal(err)) => {
                return Err(Error::StorageRemoval(format!("{err:#}")));
            }
            Err(RemoveStorageError::Retriable(err)) => {
                if tokio::time::Instant::now() + interval > deadline {
                    return Err(Error::StorageRemoval(format!(
                        "gave up after {attempts} attempts: {err:#}"
                    )));
                }
                warn!(
                    backend = %driver.storage_type(),
                    attempts,
                    "unable to remove storage, will retry: {err:#}"
                );
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Plain environment variable
pub(crate) fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

/// Environment variable read from a key of a secret
pub(crate) fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..EnvVarSource::default()
        }),
    }
}

/// Name for an operator-created bucket or container, at most 63 characters
pub(crate) fn generate_name(region: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let mut name = if region.is_empty() {
        format!("image-registry-{suffix}")
    } else {
        format!("image-registry-{}-{suffix}", region.to_lowercase())
    };
    name.truncate(63);
    name.trim_end_matches('-').to_string()
}

static BUCKET_NAME: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9]$")
        .expect("bucket name pattern is valid")
});

/// S3 and GCS bucket naming rules
pub(crate) fn validate_bucket_name(backend: StorageType, name: &str) -> Result<()> {
    if name.is_empty() || (BUCKET_NAME.is_match(name) && !name.contains("..")) {
        Ok(())
    } else {
        Err(Error::configuration(format!(
            "invalid {backend} bucket name {name:?}: use 3-63 lowercase letters, digits, dots or hyphens"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AzureStorage, FilesystemStorage, GcsStorage, S3Storage};

    #[test]
    fn test_select_single_backend() {
        let storage = StorageSpec {
            gcs: Some(GcsStorage::default()),
            ..StorageSpec::default()
        };
        assert_eq!(select_backend(&storage).expect("gcs"), StorageType::Gcs);
    }

    #[test]
    fn test_select_rejects_no_backend() {
        let err = select_backend(&StorageSpec::default()).expect_err("nothing configured");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_select_rejects_two_backends() {
        let storage = StorageSpec {
            filesystem: Some(FilesystemStorage::default()),
            s3: Some(S3Storage::default()),
            azure: Some(AzureStorage::default()),
            ..StorageSpec::default()
        };
        let err = select_backend(&storage).expect_err("three configured");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("found 3: filesystem, s3, azure"));
    }

    #[test]
    fn test_generated_names_are_valid_buckets() {
        let name = generate_name("EU-West-1");
        assert!(name.starts_with("image-registry-eu-west-1-"));
        assert!(name.len() <= 63);
        validate_bucket_name(StorageType::S3, &name).expect("generated name is valid");
    }

    #[test]
    fn test_bucket_name_rules() {
        assert!(validate_bucket_name(StorageType::S3, "my-registry").is_ok());
        assert!(validate_bucket_name(StorageType::S3, "").is_ok());
        assert!(validate_bucket_name(StorageType::S3, "My_Bucket").is_err());
        assert!(validate_bucket_name(StorageType::Gcs, "a..b").is_err());
        assert!(validate_bucket_name(StorageType::Gcs, "ab").is_err());
    }

    #[test]
    fn test_secret_env_reference() {
        let var = secret_env("REGISTRY_STORAGE_S3_ACCESSKEY", "private", "ACCESS");
        let selector = var
            .value_from
            .and_then(|v| v.secret_key_ref)
            .expect("secret key ref");
        assert_eq!(selector.name, "private");
        assert_eq!(selector.key, "ACCESS");
    }
}
