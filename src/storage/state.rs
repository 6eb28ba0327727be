//! # Config State
//!
//! Snapshot of the storage configuration last applied successfully, kept in
//! a config map so a restarted operator can tell a changed backend from an
//! unreachable one.
//!
//! The storage identity is also recorded on the Config status the moment a
//! pass syncs it, so the status is never older than the config map.

use crate::crd::{ConfigStatus, StorageSpec, StorageType};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const STATE_KEY: &str = "state";
const FIELD_MANAGER: &str = "image-registry-operator";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigState {
    #[serde(default)]
    pub storage: StorageSpec,
    #[serde(default)]
    pub storage_managed: bool,
}

impl ConfigState {
    #[must_use]
    pub fn storage_type(&self) -> Option<StorageType> {
        self.storage.configured().first().copied()
    }

    /// Snapshot recorded in the Config status, for when the config map is gone
    #[must_use]
    pub fn from_status(status: Option<&ConfigStatus>) -> Self {
        status
            .map(|s| Self {
                storage: s.storage.clone(),
                storage_managed: s.storage_managed,
            })
            .unwrap_or_default()
    }

    /// Snapshot a pass starts from: the identity recorded on the status,
    /// else the stored config map, else nothing
    #[must_use]
    pub fn resolve(stored: Option<&ConfigState>, status: Option<&ConfigStatus>) -> Self {
        let recorded = Self::from_status(status);
        if !recorded.storage.is_empty() {
            return recorded;
        }
        stored.cloned().unwrap_or(recorded)
    }

    pub async fn load(client: Client, namespace: &str, name: &str) -> Result<Option<Self>> {
        let config_maps: Api<ConfigMap> = Api::namespaced(client, namespace);
        let config_map = match config_maps.get(name).await {
            Ok(cm) => cm,
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        config_map
            .data
            .as_ref()
            .and_then(|d| d.get(STATE_KEY))
            .map(|raw| serde_json::from_str(raw).map_err(Error::from))
            .transpose()
    }

    pub async fn save(
        &self,
        client: Client,
        namespace: &str,
        name: &str,
        owner: OwnerReference,
    ) -> Result<()> {
        let config_maps: Api<ConfigMap> = Api::namespaced(client, namespace);
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: Some(vec![owner]),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                STATE_KEY.to_string(),
                serde_json::to_string(self)?,
            )])),
            ..ConfigMap::default()
        };
        config_maps
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&config_map),
            )
            .await?;
        Ok(())
    }

    pub async fn delete(client: Client, namespace: &str, name: &str) -> Result<()> {
        let config_maps: Api<ConfigMap> = Api::namespaced(client, namespace);
        match config_maps.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::S3Storage;

    #[test]
    fn test_state_serialization_is_camel_case() {
        let state = ConfigState {
            storage: StorageSpec {
                s3: Some(S3Storage {
                    bucket: "b".to_string(),
                    region: "us-east-1".to_string(),
                    ..S3Storage::default()
                }),
                ..StorageSpec::default()
            },
            storage_managed: true,
        };
        let json = serde_json::to_string(&state).expect("serialize");
        assert!(json.contains("\"storageManaged\":true"));
        let parsed: ConfigState = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed.storage_type(), Some(StorageType::S3));
    }

    #[test]
    fn test_from_status_without_status_is_empty() {
        let state = ConfigState::from_status(None);
        assert_eq!(state.storage_type(), None);
        assert!(!state.storage_managed);
    }

    #[test]
    fn test_recorded_status_wins_over_stale_config_map() {
        let stale = ConfigState {
            storage: StorageSpec {
                s3: Some(S3Storage {
                    bucket: "old".to_string(),
                    region: "us-east-1".to_string(),
                    ..S3Storage::default()
                }),
                ..StorageSpec::default()
            },
            storage_managed: true,
        };
        let status = ConfigStatus {
            storage: StorageSpec {
                s3: Some(S3Storage {
                    bucket: "new".to_string(),
                    region: "us-east-1".to_string(),
                    ..S3Storage::default()
                }),
                ..StorageSpec::default()
            },
            storage_managed: true,
            ..ConfigStatus::default()
        };
        let state = ConfigState::resolve(Some(&stale), Some(&status));
        assert_eq!(state.storage.s3.map(|s| s.bucket).as_deref(), Some("new"));
    }

    #[test]
    fn test_config_map_covers_a_lost_status() {
        let stored = ConfigState {
            storage: StorageSpec {
                s3: Some(S3Storage::default()),
                ..StorageSpec::default()
            },
            storage_managed: true,
        };
        assert_eq!(ConfigState::resolve(Some(&stored), None), stored);
        assert_eq!(ConfigState::resolve(None, None), ConfigState::default());
    }
}
