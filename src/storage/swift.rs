//! # OpenStack Swift
//!
//! Containers are managed through the Swift object API after authenticating
//! against the configured endpoint: TempAuth (v1) or Keystone (v2, v3).
//! Username and password come from the user configuration secret.

use super::rest::{self, describe};
use super::{
    env, generate_name, secret_env, ConfigState, Credentials, RemoveStorageError, StorageDriver,
};
use crate::crd::{Config, StorageSpec, StorageType, SwiftStorage};
use crate::error::{Error, Result};
use crate::observability::metrics;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub const USERNAME: &str = "REGISTRY_STORAGE_SWIFT_USERNAME";
pub const PASSWORD: &str = "REGISTRY_STORAGE_SWIFT_PASSWORD";

const BACKEND: &str = "swift";
const OBJECT_STORE: &str = "object-store";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthVersion {
    V1,
    V2,
    V3,
}

impl AuthVersion {
    /// Explicit version, or the one implied by the endpoint path
    fn resolve(config: &SwiftStorage) -> Result<Self> {
        match config.auth_version.as_str() {
            "1" => Ok(Self::V1),
            "2" => Ok(Self::V2),
            "3" => Ok(Self::V3),
            "" if config.auth_url.trim_end_matches('/').ends_with("/v3") => Ok(Self::V3),
            "" if config.auth_url.trim_end_matches('/').ends_with("/v2.0") => Ok(Self::V2),
            "" => Ok(Self::V1),
            other => Err(Error::configuration(format!(
                "unsupported swift authVersion {other:?}: use 1, 2 or 3"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct V2Response {
    access: V2Access,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V2Access {
    token: V2Token,
    #[serde(default)]
    service_catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct V2Token {
    id: String,
}

#[derive(Debug, Deserialize)]
struct V3Response {
    token: V3Token,
}

#[derive(Debug, Deserialize)]
struct V3Token {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

/// Keystone v2 and v3 endpoint shapes merged
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEndpoint {
    #[serde(default)]
    region: String,
    #[serde(default)]
    interface: String,
    url: Option<String>,
    public_url: Option<String>,
}

/// Pick the public object-store endpoint, preferring the configured region
fn object_store_url(catalog: &[CatalogEntry], region: &str) -> Option<String> {
    let endpoints = catalog
        .iter()
        .filter(|entry| entry.service_type == OBJECT_STORE)
        .flat_map(|entry| entry.endpoints.iter())
        .filter(|ep| ep.interface.is_empty() || ep.interface == "public")
        .collect::<Vec<_>>();
    endpoints
        .iter()
        .find(|ep| region.is_empty() || ep.region == region)
        .or_else(|| endpoints.first())
        .and_then(|ep| ep.public_url.clone().or_else(|| ep.url.clone()))
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
}

struct Session {
    http: Client,
    storage_url: String,
    token: Zeroizing<String>,
}

impl Session {
    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("X-Auth-Token", self.token.as_str())
    }
}

#[derive(Debug)]
pub struct SwiftDriver {
    config: SwiftStorage,
    credentials: Credentials,
    secret_name: String,
}

impl SwiftDriver {
    /// An empty container name is taken from the snapshot for the same
    /// endpoint or generated
    #[must_use]
    pub fn new(
        mut config: SwiftStorage,
        previous: &ConfigState,
        credentials: Credentials,
        secret_name: String,
    ) -> Self {
        if config.container.is_empty() {
            config.container = previous
                .storage
                .swift
                .as_ref()
                .filter(|p| p.auth_url == config.auth_url && !p.container.is_empty())
                .map_or_else(|| generate_name(&config.region_name), |p| p.container.clone());
        }
        Self {
            config,
            credentials,
            secret_name,
        }
    }

    async fn session(&self) -> anyhow::Result<Session> {
        let (username, password) = self
            .credentials
            .pair(USERNAME, PASSWORD)
            .ok_or_else(|| anyhow!("swift credentials are not configured"))?;
        let http = rest::http_client()?;
        let auth_url = self.config.auth_url.trim_end_matches('/');

        let (storage_url, token) = match AuthVersion::resolve(&self.config)? {
            AuthVersion::V1 => {
                let response = http
                    .get(auth_url)
                    .header("X-Auth-User", username)
                    .header("X-Auth-Key", password)
                    .send()
                    .await
                    .context("Failed to reach the swift auth endpoint")?;
                if !response.status().is_success() {
                    let (status, body) = describe(response).await;
                    return Err(anyhow!("swift v1 auth failed: HTTP {status}: {body}"));
                }
                let header = |name: &str| {
                    response
                        .headers()
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                (
                    header("X-Storage-Url").ok_or_else(|| anyhow!("missing X-Storage-Url"))?,
                    header("X-Auth-Token").ok_or_else(|| anyhow!("missing X-Auth-Token"))?,
                )
            }
            AuthVersion::V2 => {
                let body = json!({
                    "auth": {
                        "tenantName": self.config.tenant,
                        "passwordCredentials": { "username": username, "password": password },
                    }
                });
                let response = http
                    .post(format!("{auth_url}/tokens"))
                    .json(&body)
                    .send()
                    .await
                    .context("Failed to reach keystone")?;
                if !response.status().is_success() {
                    let (status, body) = describe(response).await;
                    return Err(anyhow!("keystone v2 auth failed: HTTP {status}: {body}"));
                }
                let parsed: V2Response = response.json().await?;
                let url = object_store_url(&parsed.access.service_catalog, &self.config.region_name)
                    .ok_or_else(|| anyhow!("no object-store endpoint in the service catalog"))?;
                (url, parsed.access.token.id)
            }
            AuthVersion::V3 => {
                let domain = if self.config.domain.is_empty() {
                    "Default"
                } else {
                    &self.config.domain
                };
                let mut body = json!({
                    "auth": {
                        "identity": {
                            "methods": ["password"],
                            "password": {
                                "user": {
                                    "name": username,
                                    "password": password,
                                    "domain": { "name": domain },
                                }
                            }
                        }
                    }
                });
                if !self.config.tenant.is_empty() {
                    body["auth"]["scope"] = json!({
                        "project": { "name": self.config.tenant, "domain": { "name": domain } }
                    });
                }
                let response = http
                    .post(format!("{auth_url}/auth/tokens"))
                    .json(&body)
                    .send()
                    .await
                    .context("Failed to reach keystone")?;
                if !response.status().is_success() {
                    let (status, body) = describe(response).await;
                    return Err(anyhow!("keystone v3 auth failed: HTTP {status}: {body}"));
                }
                let token = response
                    .headers()
                    .get("X-Subject-Token")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("missing X-Subject-Token"))?;
                let parsed: V3Response = response.json().await?;
                let url = object_store_url(&parsed.token.catalog, &self.config.region_name)
                    .ok_or_else(|| anyhow!("no object-store endpoint in the service catalog"))?;
                (url, token)
            }
        };

        debug!(storage_url = %storage_url, "authenticated to swift");
        Ok(Session {
            http,
            storage_url: storage_url.trim_end_matches('/').to_string(),
            token: Zeroizing::new(token),
        })
    }

    fn container_url(&self, session: &Session) -> String {
        format!("{}/{}", session.storage_url, self.config.container)
    }

    async fn empty_container(&self, session: &Session) -> Result<(), RemoveStorageError> {
        let url = self.container_url(session);
        loop {
            let response = session
                .request(reqwest::Method::GET, &url)
                .query(&[("format", "json")])
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
            // 204 with no body for an empty container
            let text = response
                .text()
                .await
                .map_err(|e| rest::transport_error(BACKEND, "list objects", &e))?;
            let objects: Vec<ObjectEntry> = if text.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&text)
                    .map_err(|e| RemoveStorageError::Retriable(anyhow!("{BACKEND}: {e}")))?
            };
            if objects.is_empty() {
                return Ok(());
            }
            for object in objects {
                let response = session
                    .request(reqwest::Method::DELETE, &format!("{url}/{}", object.name))
                    .send()
                    .await
                    .map_err(|e| rest::transport_error(BACKEND, "delete object", &e))?;
                if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
                    let (status, body) = describe(response).await;
                    return Err(rest::removal_error(BACKEND, "delete object", status, &body));
                }
            }
        }
    }
}

fn session_error(err: anyhow::Error) -> Error {
    metrics::increment_storage_operation_errors(BACKEND);
    Error::Storage(err)
}

#[async_trait]
impl StorageDriver for SwiftDriver {
    fn storage_type(&self) -> StorageType {
        StorageType::Swift
    }

    fn resolved(&self) -> StorageSpec {
        StorageSpec {
            swift: Some(self.config.clone()),
            ..StorageSpec::default()
        }
    }

    fn validate_configuration(&self, _previous: &ConfigState) -> Result<()> {
        if reqwest::Url::parse(&self.config.auth_url).is_err() {
            return Err(Error::configuration(format!(
                "invalid swift authURL {:?}",
                self.config.auth_url
            )));
        }
        AuthVersion::resolve(&self.config)?;
        if self.credentials.pair(USERNAME, PASSWORD).is_none() {
            return Err(Error::configuration(format!(
                "swift storage requires {USERNAME} and {PASSWORD} in the user configuration secret"
            )));
        }
        Ok(())
    }

    fn storage_changed(&self, previous: &ConfigState) -> bool {
        previous.storage.swift.as_ref().is_none_or(|p| {
            p.auth_url != self.config.auth_url
                || p.container != self.config.container
                || p.tenant != self.config.tenant
                || p.domain != self.config.domain
                || p.region_name != self.config.region_name
        })
    }

    async fn storage_exists(&self, _cr: &Config) -> Result<bool> {
        metrics::record_storage_operation(BACKEND, "head_container");
        let session = self.session().await.map_err(session_error)?;
        let response = session
            .request(reqwest::Method::HEAD, &self.container_url(&session))
            .send()
            .await
            .map_err(|e| session_error(e.into()))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => {
                let (status, body) = describe(response).await;
                Err(rest::storage_error(BACKEND, "head container", status, &body))
            }
        }
    }

    async fn create_storage(&self, _cr: &Config) -> Result<bool> {
        metrics::record_storage_operation(BACKEND, "create_container");
        let session = self.session().await.map_err(session_error)?;
        let response = session
            .request(reqwest::Method::PUT, &self.container_url(&session))
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| session_error(e.into()))?;
        match response.status() {
            // 202 when the container was already there
            StatusCode::ACCEPTED => Ok(false),
            status if status.is_success() => {
                info!(container = %self.config.container, "swift container created");
                Ok(true)
            }
            _ => {
                let (status, body) = describe(response).await;
                Err(rest::storage_error(BACKEND, "create container", status, &body))
            }
        }
    }

    async fn remove_storage(&self, _cr: &Config) -> Result<(), RemoveStorageError> {
        metrics::record_storage_operation(BACKEND, "delete_container");
        let session = self
            .session()
            .await
            .map_err(|e| RemoveStorageError::Retriable(anyhow!("{BACKEND}: {e:#}")))?;

        self.empty_container(&session).await?;

        let response = session
            .request(reqwest::Method::DELETE, &self.container_url(&session))
            .send()
            .await
            .map_err(|e| rest::transport_error(BACKEND, "delete container", &e))?;
        match response.status() {
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            _ => {
                let (status, body) = describe(response).await;
                Err(rest::removal_error(BACKEND, "delete container", status, &body))
            }
        }
    }

    fn config_env(&self) -> Vec<EnvVar> {
        let mut vars = vec![
            env("REGISTRY_STORAGE", "swift"),
            env("REGISTRY_STORAGE_SWIFT_AUTHURL", self.config.auth_url.clone()),
            env("REGISTRY_STORAGE_SWIFT_CONTAINER", self.config.container.clone()),
        ];
        let optional = [
            ("REGISTRY_STORAGE_SWIFT_AUTHVERSION", &self.config.auth_version),
            ("REGISTRY_STORAGE_SWIFT_TENANT", &self.config.tenant),
            ("REGISTRY_STORAGE_SWIFT_DOMAIN", &self.config.domain),
            ("REGISTRY_STORAGE_SWIFT_REGION", &self.config.region_name),
        ];
        vars.extend(
            optional
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| env(name, value.clone())),
        );
        vars.push(secret_env(USERNAME, &self.secret_name, USERNAME));
        vars.push(secret_env(PASSWORD, &self.secret_name, PASSWORD));
        vars
    }

    fn volumes(&self) -> Vec<(Volume, VolumeMount)> {
        Vec::new()
    }

    fn secrets(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        self.credentials.copy_into(&[USERNAME, PASSWORD], &mut data);
        data
    }
}
