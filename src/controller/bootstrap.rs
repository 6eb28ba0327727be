//! # Bootstrap
//!
//! Start-up sequence: make sure the Config `cluster` exists, then publish an
//! initial ClusterOperator status so the cluster sees the operator before the
//! first reconcile pass finishes.

use crate::constants::CONFIG_RESOURCE_NAME;
use crate::controller::generator::{generate_http_secret, Generator};
use crate::crd::{
    Config, ConfigSpec, EmptyDirSource, FilesystemStorage, ManagementState, StorageSpec,
};
use crate::error::Result;
use kube::api::PostParams;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::info;

/// Config created when none exists: one replica on ephemeral storage
#[must_use]
pub fn default_config() -> Config {
    Config::new(
        CONFIG_RESOURCE_NAME,
        ConfigSpec {
            management_state: ManagementState::Managed,
            storage: StorageSpec {
                filesystem: Some(FilesystemStorage {
                    empty_dir: Some(EmptyDirSource::default()),
                    ..FilesystemStorage::default()
                }),
                ..StorageSpec::default()
            },
            routes: Vec::new(),
            default_route: false,
            replicas: 1,
            tls: true,
            http_secret: generate_http_secret(),
            logging: 2,
            requests: None,
            node_selector: BTreeMap::new(),
            image: None,
        },
    )
}

/// Fetch the Config, creating the default one if it is missing
pub async fn ensure_config(client: Client) -> Result<Config> {
    let api: Api<Config> = Api::all(client);
    if let Some(cr) = api.get_opt(CONFIG_RESOURCE_NAME).await? {
        return Ok(cr);
    }

    match api.create(&PostParams::default(), &default_config()).await {
        Ok(cr) => {
            info!(config = CONFIG_RESOURCE_NAME, "default registry config created");
            Ok(cr)
        }
        // Lost the race against another creator
        Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
            Ok(api.get(CONFIG_RESOURCE_NAME).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Full start-up sequence
pub async fn bootstrap(client: Client, generator: &Generator) -> Result<Config> {
    let cr = ensure_config(client).await?;
    generator.apply_cluster_operator(&cr).await?;
    info!(
        management_state = %cr.spec.management_state,
        "cluster operator status initialised"
    );
    Ok(cr)
}
