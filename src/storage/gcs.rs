//! # Google Cloud Storage
//!
//! Buckets are managed through the GCS JSON API. The operator authenticates
//! with the GKE/GCE metadata server (Workload Identity) or, when the user
//! configuration secret carries an `authorized_user` keyfile, with its
//! refresh token. The keyfile itself is handed to the registry through a
//! secret volume.
//!
//! References:
//! - [Cloud Storage JSON API](https://cloud.google.com/storage/docs/json_api/v1)

use super::rest::{self, describe};
use super::{
    env, generate_name, validate_bucket_name, ConfigState, Credentials, RemoveStorageError,
    StorageDriver,
};
use crate::crd::{Config, GcsStorage, StorageSpec, StorageType};
use crate::error::{Error, Result};
use crate::observability::metrics;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EnvVar, KeyToPath, SecretVolumeSource, Volume, VolumeMount,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub const KEYFILE: &str = "REGISTRY_STORAGE_GCS_KEYFILE";

const BACKEND: &str = "gcs";
const API_BASE: &str = "https://storage.googleapis.com/storage/v1";
const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const VOLUME_NAME: &str = "registry-storage-gcs";
const KEYFILE_DIRECTORY: &str = "/gcs";
const KEYFILE_PATH: &str = "/gcs/keyfile";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Keyfile {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ServiceAccount {
        #[serde(default)]
        project_id: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectItem {
    name: String,
}

/// Authenticated JSON API session
struct Session {
    http: Client,
    token: Zeroizing<String>,
}

impl Session {
    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.get(url).bearer_auth(self.token.as_str())
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.post(url).bearer_auth(self.token.as_str())
    }

    fn delete(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.delete(url).bearer_auth(self.token.as_str())
    }
}

#[derive(Debug)]
pub struct GcsDriver {
    config: GcsStorage,
    credentials: Credentials,
    secret_name: String,
}

impl GcsDriver {
    /// Resolve the bucket name the same way as for S3: configured, recorded
    /// for the same region, or generated
    #[must_use]
    pub fn new(
        mut config: GcsStorage,
        previous: &ConfigState,
        credentials: Credentials,
        secret_name: String,
    ) -> Self {
        if config.bucket.is_empty() {
            config.bucket = previous
                .storage
                .gcs
                .as_ref()
                .filter(|p| p.region == config.region && !p.bucket.is_empty())
                .map_or_else(|| generate_name(&config.region), |p| p.bucket.clone());
        }
        Self {
            config,
            credentials,
            secret_name,
        }
    }

    fn keyfile(&self) -> Result<Option<Keyfile>> {
        self.credentials
            .get(KEYFILE)
            .map(|raw| {
                serde_json::from_str(raw).map_err(|e| {
                    Error::configuration(format!("{KEYFILE} is not a valid GCS keyfile: {e}"))
                })
            })
            .transpose()
    }

    async fn session(&self) -> anyhow::Result<Session> {
        let http = rest::http_client()?;
        let token = match self.keyfile()? {
            Some(Keyfile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            }) => {
                let response = http
                    .post(TOKEN_ENDPOINT)
                    .form(&[
                        ("grant_type", "refresh_token"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("refresh_token", refresh_token.as_str()),
                    ])
                    .send()
                    .await
                    .context("Failed to reach the OAuth2 token endpoint")?;
                if !response.status().is_success() {
                    let (status, body) = describe(response).await;
                    return Err(anyhow!("token refresh failed: HTTP {status}: {body}"));
                }
                let token: TokenResponse = response.json().await?;
                token.access_token
            }
            Some(Keyfile::ServiceAccount { .. }) => {
                debug!("service account keyfile is passed to the registry, operator uses the metadata server");
                metadata_token(&http).await?
            }
            None => metadata_token(&http).await?,
        };
        Ok(Session {
            http,
            token: Zeroizing::new(token),
        })
    }

    async fn project_id(&self, session: &Session) -> anyhow::Result<String> {
        if !self.config.project_id.is_empty() {
            return Ok(self.config.project_id.clone());
        }
        if let Ok(Some(Keyfile::ServiceAccount { project_id })) = self.keyfile() {
            if !project_id.is_empty() {
                return Ok(project_id);
            }
        }
        let response = session
            .http
            .get(format!("{METADATA_BASE}/project/project-id"))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("projectID is not set and the metadata server is unreachable")?;
        Ok(response.error_for_status()?.text().await?)
    }

    fn bucket_url(&self) -> String {
        format!("{API_BASE}/b/{}", self.config.bucket)
    }

    async fn empty_bucket(&self, session: &Session) -> Result<(), RemoveStorageError> {
        let mut page_token: Option<String> = None;
        loop {
            let mut request = session.get(&format!("{}/o", self.bucket_url()));
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let response = request
                .send()
                .await
                .map_err(|e| rest::transport_error(BACKEND, "list objects", &e))?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(());
            }
            if !response.status().is_success() {
                let (status, body) = describe(response).await;
                return Err(rest::removal_error(BACKEND, "list objects", status, &body));
            }
            let page: ObjectList = response
                .json()
                .await
                .map_err(|e| rest::transport_error(BACKEND, "list objects", &e))?;

            for item in page.items {
                let url = format!("{}/o/{}", self.bucket_url(), encode_object_name(&item.name));
                let response = session
                    .delete(&url)
                    .send()
                    .await
                    .map_err(|e| rest::transport_error(BACKEND, "delete object", &e))?;
                if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
                    let (status, body) = describe(response).await;
                    return Err(rest::removal_error(BACKEND, "delete object", status, &body));
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(()),
            }
        }
    }
}

async fn metadata_token(http: &Client) -> anyhow::Result<String> {
    let response = http
        .get(format!(
            "{METADATA_BASE}/instance/service-accounts/default/token"
        ))
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .context("GCS credentials not configured and the metadata server is unreachable")?;
    if !response.status().is_success() {
        let (status, body) = describe(response).await;
        return Err(anyhow!("metadata server returned HTTP {status}: {body}"));
    }
    let token: TokenResponse = response
        .json()
        .await
        .context("Failed to parse token response from metadata server")?;
    Ok(token.access_token)
}

/// Object names go into a single path segment
fn encode_object_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn session_error(err: anyhow::Error) -> Error {
    metrics::increment_storage_operation_errors(BACKEND);
    Error::Storage(err)
}

#[async_trait]
impl StorageDriver for GcsDriver {
    fn storage_type(&self) -> StorageType {
        StorageType::Gcs
    }

    fn resolved(&self) -> StorageSpec {
        StorageSpec {
            gcs: Some(self.config.clone()),
            ..StorageSpec::default()
        }
    }

    fn validate_configuration(&self, _previous: &ConfigState) -> Result<()> {
        validate_bucket_name(StorageType::Gcs, &self.config.bucket)?;
        self.keyfile().map(|_| ())
    }

    fn storage_changed(&self, previous: &ConfigState) -> bool {
        previous.storage.gcs.as_ref().is_none_or(|p| {
            p.bucket != self.config.bucket
                || p.region != self.config.region
                || p.project_id != self.config.project_id
        })
    }

    async fn storage_exists(&self, _cr: &Config) -> Result<bool> {
        metrics::record_storage_operation(BACKEND, "get_bucket");
        let session = self.session().await.map_err(session_error)?;
        let response = session
            .get(&self.bucket_url())
            .send()
            .await
            .map_err(|e| session_error(e.into()))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => {
                let (status, body) = describe(response).await;
                Err(rest::storage_error(BACKEND, "get bucket", status, &body))
            }
        }
    }

    async fn create_storage(&self, cr: &Config) -> Result<bool> {
        metrics::record_storage_operation(BACKEND, "create_bucket");
        let session = self.session().await.map_err(session_error)?;
        let project = self.project_id(&session).await.map_err(session_error)?;

        let mut body = serde_json::json!({
            "name": self.config.bucket,
            "iamConfiguration": {
                "uniformBucketLevelAccess": { "enabled": true },
                "publicAccessPrevention": "enforced",
            },
        });
        if !self.config.region.is_empty() {
            body["location"] = serde_json::Value::String(self.config.region.clone());
        }

        let response = session
            .post(&format!("{API_BASE}/b"))
            .query(&[("project", project.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| session_error(e.into()))?;

        match response.status() {
            status if status.is_success() => {
                info!(bucket = %self.config.bucket, project = %project, "gcs bucket created");
                Ok(true)
            }
            StatusCode::CONFLICT => {
                // 409 covers both our own bucket and a global name clash
                let (_, body) = describe(response).await;
                if self.storage_exists(cr).await? {
                    debug!(bucket = %self.config.bucket, "bucket already exists and is accessible");
                    Ok(false)
                } else {
                    Err(Error::configuration(format!(
                        "gcs bucket {} already exists and is owned by another project: {}",
                        self.config.bucket,
                        body.trim()
                    )))
                }
            }
            _ => {
                let (status, body) = describe(response).await;
                Err(rest::storage_error(BACKEND, "create bucket", status, &body))
            }
        }
    }

    async fn remove_storage(&self, _cr: &Config) -> Result<(), RemoveStorageError> {
        metrics::record_storage_operation(BACKEND, "delete_bucket");
        let session = self.session().await.map_err(|e| {
            warn!("unable to authenticate to GCS: {e:#}");
            RemoveStorageError::Retriable(e)
        })?;

        self.empty_bucket(&session).await?;

        let response = session
            .delete(&self.bucket_url())
            .send()
            .await
            .map_err(|e| rest::transport_error(BACKEND, "delete bucket", &e))?;
        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            _ => {
                let (status, body) = describe(response).await;
                Err(rest::removal_error(BACKEND, "delete bucket", status, &body))
            }
        }
    }

    fn config_env(&self) -> Vec<EnvVar> {
        let mut vars = vec![
            env("REGISTRY_STORAGE", "gcs"),
            env("REGISTRY_STORAGE_GCS_BUCKET", self.config.bucket.clone()),
        ];
        if self.credentials.get(KEYFILE).is_some() {
            vars.push(env(KEYFILE, KEYFILE_PATH));
        }
        vars
    }

    fn volumes(&self) -> Vec<(Volume, VolumeMount)> {
        if self.credentials.get(KEYFILE).is_none() {
            return Vec::new();
        }
        let volume = Volume {
            name: VOLUME_NAME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(self.secret_name.clone()),
                items: Some(vec![KeyToPath {
                    key: KEYFILE.to_string(),
                    path: "keyfile".to_string(),
                    mode: None,
                }]),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        };
        let mount = VolumeMount {
            name: VOLUME_NAME.to_string(),
            mount_path: KEYFILE_DIRECTORY.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        };
        vec![(volume, mount)]
    }

    fn secrets(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        self.credentials.copy_into(&[KEYFILE], &mut data);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE_ACCOUNT: &str = r#"{"type":"service_account","project_id":"my-project","private_key":"x"}"#;

    #[test]
    fn test_project_change_is_a_storage_change() {
        let previous = ConfigState {
            storage: StorageSpec {
                gcs: Some(GcsStorage {
                    bucket: "registry".to_string(),
                    project_id: "a".to_string(),
                    ..GcsStorage::default()
                }),
                ..StorageSpec::default()
            },
            storage_managed: true,
        };
        let d = GcsDriver::new(
            GcsStorage {
                bucket: "registry".to_string(),
                project_id: "b".to_string(),
                ..GcsStorage::default()
            },
            &previous,
            Credentials::default(),
            "private".to_string(),
        );
        assert!(d.storage_changed(&previous));
    }

    #[test]
    fn test_keyfile_is_mounted_from_private_secret() {
        let d = GcsDriver::new(
            GcsStorage {
                bucket: "registry".to_string(),
                ..GcsStorage::default()
            },
            &ConfigState::default(),
            Credentials::from_pairs([(KEYFILE, SERVICE_ACCOUNT)]),
            "private".to_string(),
        );
        d.validate_configuration(&ConfigState::default())
            .expect("service account keyfile parses");
        let volumes = d.volumes();
        let (volume, mount) = volumes.first().expect("keyfile volume");
        assert_eq!(
            volume.secret.as_ref().and_then(|s| s.secret_name.as_deref()),
            Some("private")
        );
        assert_eq!(mount.mount_path, "/gcs");
        assert!(d
            .config_env()
            .iter()
            .any(|v| v.name == KEYFILE && v.value.as_deref() == Some("/gcs/keyfile")));
        assert!(d.secrets().contains_key(KEYFILE));
    }

    #[test]
    fn test_garbage_keyfile_is_configuration_error() {
        let d = GcsDriver::new(
            GcsStorage {
                bucket: "registry".to_string(),
                ..GcsStorage::default()
            },
            &ConfigState::default(),
            Credentials::from_pairs([(KEYFILE, "not json")]),
            "private".to_string(),
        );
        let err = d
            .validate_configuration(&ConfigState::default())
            .expect_err("invalid keyfile");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_object_names_are_path_encoded() {
        assert_eq!(
            encode_object_name("docker/registry/v2/blobs"),
            "docker%2Fregistry%2Fv2%2Fblobs"
        );
        assert_eq!(encode_object_name("a b"), "a%20b");
    }
}
