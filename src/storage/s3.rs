//! # S3
//!
//! Amazon S3 and S3-compatible object storage.
//!
//! Credentials come from `REGISTRY_STORAGE_S3_ACCESSKEY` /
//! `REGISTRY_STORAGE_S3_SECRETKEY` in the user configuration secret. Without
//! them the SDK default chain is used (IRSA, instance profile).

use super::{
    env, generate_name, secret_env, validate_bucket_name, ConfigState, Credentials,
    RemoveStorageError, StorageDriver,
};
use crate::crd::{Config, S3Storage, StorageSpec, StorageType};
use crate::error::{Error, Result};
use crate::observability::metrics;
use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, PublicAccessBlockConfiguration,
};
use aws_sdk_s3::Client;
use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

pub const ACCESS_KEY: &str = "REGISTRY_STORAGE_S3_ACCESSKEY";
pub const SECRET_KEY: &str = "REGISTRY_STORAGE_S3_SECRETKEY";

const BACKEND: &str = "s3";
const DEFAULT_REGION: &str = "us-east-1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const OPERATION_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct S3Driver {
    config: S3Storage,
    credentials: Credentials,
    secret_name: String,
}

impl S3Driver {
    /// Resolve the bucket name: the configured one, the one recorded for the
    /// same region in `previous`, or a freshly generated one
    #[must_use]
    pub fn new(
        mut config: S3Storage,
        previous: &ConfigState,
        credentials: Credentials,
        secret_name: String,
    ) -> Self {
        if config.bucket.is_empty() {
            config.bucket = previous
                .storage
                .s3
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

    fn region(&self) -> &str {
        if self.config.region.is_empty() {
            DEFAULT_REGION
        } else {
            &self.config.region
        }
    }

    async fn client(&self) -> Client {
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .operation_attempt_timeout(OPERATION_ATTEMPT_TIMEOUT)
            .operation_timeout(OPERATION_TIMEOUT)
            .build();
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region().to_string()))
            .timeout_config(timeouts);
        if let Some((access_key, secret_key)) = self.credentials.pair(ACCESS_KEY, SECRET_KEY) {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "image-registry-operator",
            ));
        }
        if !self.config.region_endpoint.is_empty() {
            loader = loader.endpoint_url(&self.config.region_endpoint);
        }
        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(!self.config.region_endpoint.is_empty())
            .build();
        Client::from_conf(s3_config)
    }

    async fn empty_bucket(&self, client: &Client) -> Result<(), RemoveStorageError> {
        let bucket = &self.config.bucket;
        let mut continuation_token: Option<String> = None;
        loop {
            let mut request = client.list_objects_v2().bucket(bucket);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }
            let resp = match request.send().await {
                Ok(resp) => resp,
                Err(e) if is_no_such_bucket(&e) => return Ok(()),
                Err(e) => return Err(removal_error(&e, "list objects")),
            };

            for key in resp.contents.unwrap_or_default().into_iter().filter_map(|o| o.key) {
                client
                    .delete_object()
                    .bucket(bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| removal_error(&e, "delete object"))?;
            }

            if resp.is_truncated == Some(true) {
                continuation_token = resp.next_continuation_token;
            } else {
                return Ok(());
            }
        }
    }
}

fn status_of<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|r| r.status().as_u16())
}

fn code_of<E: ProvideErrorMetadata>(err: &SdkError<E>) -> Option<&str> {
    err.as_service_error().and_then(ProvideErrorMetadata::code)
}

fn is_no_such_bucket<E: ProvideErrorMetadata>(err: &SdkError<E>) -> bool {
    code_of(err) == Some("NoSuchBucket") || status_of(err) == Some(404)
}

/// Access and credential failures are terminal, everything else is retried
fn removal_error<E>(err: &SdkError<E>, operation: &str) -> RemoveStorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    metrics::increment_storage_operation_errors(BACKEND);
    let terminal = status_of(err) == Some(403)
        || matches!(
            code_of(err),
            Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch")
        );
    let err = anyhow!(
        "unable to {operation}: {}",
        code_of(err).map_or_else(|| err.to_string(), str::to_string)
    );
    if terminal {
        RemoveStorageError::Terminal(err)
    } else {
        RemoveStorageError::Retriable(err)
    }
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn storage_type(&self) -> StorageType {
        StorageType::S3
    }

    fn resolved(&self) -> StorageSpec {
        StorageSpec {
            s3: Some(self.config.clone()),
            ..StorageSpec::default()
        }
    }

    fn validate_configuration(&self, _previous: &ConfigState) -> Result<()> {
        validate_bucket_name(StorageType::S3, &self.config.bucket)?;
        if !self.config.region_endpoint.is_empty()
            && reqwest::Url::parse(&self.config.region_endpoint).is_err()
        {
            return Err(Error::configuration(format!(
                "invalid s3 regionEndpoint {:?}",
                self.config.region_endpoint
            )));
        }
        Ok(())
    }

    fn storage_changed(&self, previous: &ConfigState) -> bool {
        previous.storage.s3.as_ref().is_none_or(|p| {
            p.bucket != self.config.bucket
                || p.region != self.config.region
                || p.region_endpoint != self.config.region_endpoint
        })
    }

    async fn storage_exists(&self, _cr: &Config) -> Result<bool> {
        metrics::record_storage_operation(BACKEND, "head_bucket");
        let client = self.client().await;
        match client.head_bucket().bucket(&self.config.bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if status_of(&e) == Some(404) => Ok(false),
            Err(e) => {
                metrics::increment_storage_operation_errors(BACKEND);
                Err(Error::Storage(anyhow!(
                    "unable to check bucket {}: {}",
                    self.config.bucket,
                    code_of(&e).map_or_else(|| e.to_string(), str::to_string)
                )))
            }
        }
    }

    async fn create_storage(&self, _cr: &Config) -> Result<bool> {
        metrics::record_storage_operation(BACKEND, "create_bucket");
        let client = self.client().await;
        let bucket = &self.config.bucket;

        let mut request = client.create_bucket().bucket(bucket);
        if self.region() != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region()))
                    .build(),
            );
        }

        let created = match request.send().await {
            Ok(_) => true,
            Err(e) if code_of(&e) == Some("BucketAlreadyOwnedByYou") => {
                debug!(bucket = %bucket, "bucket already exists and is owned by us");
                false
            }
            Err(e) if code_of(&e) == Some("BucketAlreadyExists") => {
                return Err(Error::configuration(format!(
                    "s3 bucket {bucket} already exists and is owned by another account"
                )));
            }
            Err(e) => {
                metrics::increment_storage_operation_errors(BACKEND);
                return Err(Error::Storage(anyhow!(
                    "unable to create bucket {bucket}: {}",
                    code_of(&e).map_or_else(|| e.to_string(), str::to_string)
                )));
            }
        };

        if created {
            client
                .put_public_access_block()
                .bucket(bucket)
                .public_access_block_configuration(
                    PublicAccessBlockConfiguration::builder()
                        .block_public_acls(true)
                        .block_public_policy(true)
                        .ignore_public_acls(true)
                        .restrict_public_buckets(true)
                        .build(),
                )
                .send()
                .await
                .map_err(|e| {
                    Error::Storage(anyhow!("unable to block public access on {bucket}: {e}"))
                })?;
            info!(bucket = %bucket, region = self.region(), "s3 bucket created");
        }
        Ok(created)
    }

    async fn remove_storage(&self, _cr: &Config) -> Result<(), RemoveStorageError> {
        metrics::record_storage_operation(BACKEND, "delete_bucket");
        let client = self.client().await;

        self.empty_bucket(&client).await?;

        match client
            .delete_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_no_such_bucket(&e) => Ok(()),
            Err(e) => Err(removal_error(&e, "delete bucket")),
        }
    }

    fn config_env(&self) -> Vec<EnvVar> {
        let mut vars = vec![
            env("REGISTRY_STORAGE", "s3"),
            env("REGISTRY_STORAGE_S3_BUCKET", self.config.bucket.clone()),
            env("REGISTRY_STORAGE_S3_REGION", self.region()),
            env("REGISTRY_STORAGE_S3_ENCRYPT", self.config.encrypt.to_string()),
        ];
        if !self.config.region_endpoint.is_empty() {
            vars.push(env(
                "REGISTRY_STORAGE_S3_REGIONENDPOINT",
                self.config.region_endpoint.clone(),
            ));
        }
        if self.credentials.pair(ACCESS_KEY, SECRET_KEY).is_some() {
            vars.push(secret_env(ACCESS_KEY, &self.secret_name, ACCESS_KEY));
            vars.push(secret_env(SECRET_KEY, &self.secret_name, SECRET_KEY));
        }
        vars
    }

    fn volumes(&self) -> Vec<(Volume, VolumeMount)> {
        Vec::new()
    }

    fn secrets(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        self.credentials.copy_into(&[ACCESS_KEY, SECRET_KEY], &mut data);
        data
    }
}
