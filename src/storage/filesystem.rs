//! Local volume storage: an emptyDir or an existing persistent volume claim
//! mounted at `/registry`.

use super::{env, ConfigState, RemoveStorageError, StorageContext, StorageDriver};
use crate::crd::{Config, FilesystemStorage, StorageSpec, StorageType};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource,
    Volume, VolumeMount,
};
use kube::Api;
use std::collections::BTreeMap;

const VOLUME_NAME: &str = "registry-storage";
const ROOT_DIRECTORY: &str = "/registry";

pub struct FilesystemDriver {
    config: FilesystemStorage,
    claims: Api<PersistentVolumeClaim>,
}

impl std::fmt::Debug for FilesystemDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemDriver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FilesystemDriver {
    #[must_use]
    pub fn new(config: FilesystemStorage, ctx: &StorageContext) -> Self {
        Self {
            config,
            claims: Api::namespaced(ctx.client.clone(), &ctx.namespace),
        }
    }
}

/// Reject volume sources the registry cannot use
pub fn validate(config: &FilesystemStorage) -> Result<()> {
    if config.host_path.is_some() {
        return Err(Error::configuration("HostPath is not supported"));
    }
    match (&config.empty_dir, &config.persistent_volume_claim) {
        (Some(_), Some(_)) => Err(Error::configuration(
            "filesystem storage must set exactly one of emptyDir or persistentVolumeClaim",
        )),
        (None, None) => Err(Error::configuration(
            "filesystem storage requires a volume source (emptyDir or persistentVolumeClaim)",
        )),
        (None, Some(claim)) if claim.claim_name.is_empty() => Err(Error::configuration(
            "persistentVolumeClaim.claimName must not be empty",
        )),
        _ => Ok(()),
    }
}

/// Volume and mount backing the registry root directory
#[must_use]
pub fn volume(config: &FilesystemStorage) -> (Volume, VolumeMount) {
    let mut volume = Volume {
        name: VOLUME_NAME.to_string(),
        ..Volume::default()
    };
    match &config.persistent_volume_claim {
        Some(claim) => {
            volume.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.claim_name.clone(),
                read_only: Some(claim.read_only),
            });
        }
        None => {
            volume.empty_dir = Some(EmptyDirVolumeSource {
                medium: config.empty_dir.as_ref().and_then(|e| e.medium.clone()),
                size_limit: None,
            });
        }
    }
    let mount = VolumeMount {
        name: VOLUME_NAME.to_string(),
        mount_path: ROOT_DIRECTORY.to_string(),
        ..VolumeMount::default()
    };
    (volume, mount)
}

#[async_trait]
impl StorageDriver for FilesystemDriver {
    fn storage_type(&self) -> StorageType {
        StorageType::Filesystem
    }

    fn resolved(&self) -> StorageSpec {
        StorageSpec {
            filesystem: Some(self.config.clone()),
            ..StorageSpec::default()
        }
    }

    fn validate_configuration(&self, _previous: &ConfigState) -> Result<()> {
        validate(&self.config)
    }

    fn storage_changed(&self, previous: &ConfigState) -> bool {
        previous.storage.filesystem.as_ref() != Some(&self.config)
    }

    async fn storage_exists(&self, _cr: &Config) -> Result<bool> {
        let Some(claim) = &self.config.persistent_volume_claim else {
            return Ok(true);
        };
        match self.claims.get(&claim.claim_name).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_storage(&self, cr: &Config) -> Result<bool> {
        match &self.config.persistent_volume_claim {
            Some(claim) if !self.storage_exists(cr).await? => Err(Error::configuration(format!(
                "persistent volume claim {} does not exist",
                claim.claim_name
            ))),
            _ => Ok(false),
        }
    }

    async fn remove_storage(&self, _cr: &Config) -> Result<(), RemoveStorageError> {
        // Volumes are not created by the operator; nothing to delete
        Ok(())
    }

    fn config_env(&self) -> Vec<EnvVar> {
        vec![
            env("REGISTRY_STORAGE", "filesystem"),
            env("REGISTRY_STORAGE_FILESYSTEM_ROOTDIRECTORY", ROOT_DIRECTORY),
        ]
    }

    fn volumes(&self) -> Vec<(Volume, VolumeMount)> {
        vec![volume(&self.config)]
    }

    fn secrets(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}
