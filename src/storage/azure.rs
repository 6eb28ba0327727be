//! # Azure Blob Storage
//!
//! The registry talks to the container with the storage account key from
//! the user configuration secret. The operator itself manages the container
//! through the Blob REST API with an Entra ID token (Workload Identity when a
//! federated token is projected into the pod, Managed Identity otherwise).

use super::rest::{self, describe};
use super::{
    env, generate_name, secret_env, ConfigState, Credentials, RemoveStorageError, StorageDriver,
};
use crate::crd::{AzureStorage, Config, StorageSpec, StorageType};
use crate::error::{Error, Result};
use crate::observability::metrics;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use azure_core::credentials::{TokenCredential, TokenRequestOptions};
use azure_identity::{ManagedIdentityCredential, WorkloadIdentityCredential};
use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

pub const ACCOUNT_KEY: &str = "REGISTRY_STORAGE_AZURE_ACCOUNTKEY";

const BACKEND: &str = "azure";
const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";
const API_VERSION: &str = "2021-08-06";

static ACCOUNT_NAME: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-z0-9]{3,24}$").expect("account name pattern is valid")
});

static CONTAINER_NAME: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-z0-9](?:[a-z0-9]|-[a-z0-9]){2,62}$")
        .expect("container name pattern is valid")
});

#[derive(Debug)]
pub struct AzureDriver {
    config: AzureStorage,
    credentials: Credentials,
    secret_name: String,
}

struct Session {
    http: Client,
    token: String,
}

impl AzureDriver {
    /// An empty container name is taken from the snapshot for the same
    /// account or generated
    #[must_use]
    pub fn new(
        mut config: AzureStorage,
        previous: &ConfigState,
        credentials: Credentials,
        secret_name: String,
    ) -> Self {
        if config.container.is_empty() {
            config.container = previous
                .storage
                .azure
                .as_ref()
                .filter(|p| p.account_name == config.account_name && !p.container.is_empty())
                .map_or_else(|| generate_name(""), |p| p.container.clone());
        }
        Self {
            config,
            credentials,
            secret_name,
        }
    }

    fn container_url(&self) -> String {
        format!(
            "https://{}.blob.core.windows.net/{}",
            self.config.account_name, self.config.container
        )
    }

    async fn session(&self) -> anyhow::Result<Session> {
        let credential: Arc<dyn TokenCredential> =
            if std::env::var_os("AZURE_FEDERATED_TOKEN_FILE").is_some() {
                debug!("using Azure Workload Identity");
                WorkloadIdentityCredential::new(None)
                    .context("Failed to create WorkloadIdentityCredential")?
            } else {
                debug!("using Azure Managed Identity");
                ManagedIdentityCredential::new(None)
                    .context("Failed to create ManagedIdentityCredential")?
            };
        let token = credential
            .get_token(&[STORAGE_SCOPE], Some(TokenRequestOptions::default()))
            .await
            .context("Failed to get Azure Storage access token")?;
        Ok(Session {
            http: rest::http_client()?,
            token: token.token.secret().to_string(),
        })
    }

    fn request(&self, session: &Session, method: reqwest::Method) -> reqwest::RequestBuilder {
        session
            .http
            .request(method, self.container_url())
            .query(&[("restype", "container")])
            .bearer_auth(&session.token)
            .header("x-ms-version", API_VERSION)
    }
}

fn session_error(err: anyhow::Error) -> Error {
    metrics::increment_storage_operation_errors(BACKEND);
    Error::Storage(err)
}

#[async_trait]
impl StorageDriver for AzureDriver {
    fn storage_type(&self) -> StorageType {
        StorageType::Azure
    }

    fn resolved(&self) -> StorageSpec {
        StorageSpec {
            azure: Some(self.config.clone()),
            ..StorageSpec::default()
        }
    }

    fn validate_configuration(&self, _previous: &ConfigState) -> Result<()> {
        if !ACCOUNT_NAME.is_match(&self.config.account_name) {
            return Err(Error::configuration(format!(
                "invalid azure accountName {:?}: use 3-24 lowercase letters or digits",
                self.config.account_name
            )));
        }
        if !CONTAINER_NAME.is_match(&self.config.container) {
            return Err(Error::configuration(format!(
                "invalid azure container name {:?}",
                self.config.container
            )));
        }
        if self.credentials.get(ACCOUNT_KEY).is_none() {
            return Err(Error::configuration(format!(
                "azure storage requires {ACCOUNT_KEY} in the user configuration secret"
            )));
        }
        Ok(())
    }

    fn storage_changed(&self, previous: &ConfigState) -> bool {
        previous.storage.azure.as_ref().is_none_or(|p| {
            p.account_name != self.config.account_name || p.container != self.config.container
        })
    }

    async fn storage_exists(&self, _cr: &Config) -> Result<bool> {
        metrics::record_storage_operation(BACKEND, "get_container");
        let session = self.session().await.map_err(session_error)?;
        let response = self
            .request(&session, reqwest::Method::GET)
            .send()
            .await
            .map_err(|e| session_error(e.into()))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => {
                let (status, body) = describe(response).await;
                Err(rest::storage_error(BACKEND, "get container", status, &body))
            }
        }
    }

    async fn create_storage(&self, _cr: &Config) -> Result<bool> {
        metrics::record_storage_operation(BACKEND, "create_container");
        let session = self.session().await.map_err(session_error)?;
        let response = self
            .request(&session, reqwest::Method::PUT)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| session_error(e.into()))?;
        match response.status() {
            status if status.is_success() => {
                info!(
                    account = %self.config.account_name,
                    container = %self.config.container,
                    "azure container created"
                );
                Ok(true)
            }
            StatusCode::CONFLICT => {
                let (status, body) = describe(response).await;
                if body.contains("ContainerAlreadyExists") {
                    debug!(container = %self.config.container, "container already exists");
                    Ok(false)
                } else {
                    // ContainerBeingDeleted and friends clear up on their own
                    Err(rest::storage_error(BACKEND, "create container", status, &body))
                }
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
        let response = self
            .request(&session, reqwest::Method::DELETE)
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
        vec![
            env("REGISTRY_STORAGE", "azure"),
            env("REGISTRY_STORAGE_AZURE_CONTAINER", self.config.container.clone()),
            env(
                "REGISTRY_STORAGE_AZURE_ACCOUNTNAME",
                self.config.account_name.clone(),
            ),
            secret_env(ACCOUNT_KEY, &self.secret_name, ACCOUNT_KEY),
        ]
    }

    fn volumes(&self) -> Vec<(Volume, VolumeMount)> {
        Vec::new()
    }

    fn secrets(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        self.credentials.copy_into(&[ACCOUNT_KEY], &mut data);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(account: &str, container: &str, credentials: Credentials) -> AzureDriver {
        AzureDriver::new(
            AzureStorage {
                account_name: account.to_string(),
                container: container.to_string(),
            },
            &ConfigState::default(),
            credentials,
            "private".to_string(),
        )
    }

    #[test]
    fn test_account_key_is_required() {
        let d = driver("registryacct", "images", Credentials::default());
        let err = d
            .validate_configuration(&ConfigState::default())
            .expect_err("missing account key");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_account_name_rules() {
        let creds = Credentials::from_pairs([(ACCOUNT_KEY, "a2V5")]);
        assert!(driver("registryacct", "images", creds.clone())
            .validate_configuration(&ConfigState::default())
            .is_ok());
        assert!(driver("Registry_Acct", "images", creds)
            .validate_configuration(&ConfigState::default())
            .is_err());
    }

    #[test]
    fn test_generated_container_is_valid() {
        let d = driver(
            "registryacct",
            "",
            Credentials::from_pairs([(ACCOUNT_KEY, "a2V5")]),
        );
        assert!(d.config.container.starts_with("image-registry-"));
        d.validate_configuration(&ConfigState::default())
            .expect("generated container name is valid");
    }

    #[test]
    fn test_container_is_reused_for_same_account() {
        let previous = ConfigState {
            storage: StorageSpec {
                azure: Some(AzureStorage {
                    account_name: "registryacct".to_string(),
                    container: "image-registry-abc".to_string(),
                }),
                ..StorageSpec::default()
            },
            storage_managed: true,
        };
        let d = AzureDriver::new(
            AzureStorage {
                account_name: "registryacct".to_string(),
                container: String::new(),
            },
            &previous,
            Credentials::default(),
            "private".to_string(),
        );
        assert_eq!(d.config.container, "image-registry-abc");
        assert!(!d.storage_changed(&previous));
    }

    #[test]
    fn test_account_key_comes_from_private_secret() {
        let d = driver("registryacct", "images", Credentials::default());
        let key = d
            .config_env()
            .into_iter()
            .find(|v| v.name == ACCOUNT_KEY)
            .expect("account key env");
        let selector = key
            .value_from
            .and_then(|v| v.secret_key_ref)
            .expect("secret ref");
        assert_eq!(selector.name, "private");
    }
}
