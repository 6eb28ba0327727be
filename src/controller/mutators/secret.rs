use super::{merge_checksummed, MutatorContext, Target};
use crate::controller::apply::Mutator;
use crate::controller::object;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::DeleteParams;
use kube::Api;
use std::collections::BTreeMap;

pub const HTTP_SECRET_KEY: &str = "REGISTRY_HTTP_SECRET";

/// Operator-owned secret holding the storage credentials and the HTTP
/// secret. The deployment reads every sensitive value from here.
pub struct PrivateConfigurationMutator {
    ctx: MutatorContext,
    target: Target<Secret>,
    data: BTreeMap<String, String>,
}

impl std::fmt::Debug for PrivateConfigurationMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateConfigurationMutator")
            .field("target", &self.target)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl PrivateConfigurationMutator {
    #[must_use]
    pub fn new(ctx: MutatorContext, storage_secrets: BTreeMap<String, String>, http_secret: &str) -> Self {
        let target = Target::new(
            Api::namespaced(ctx.client.clone(), ctx.namespace()),
            ctx.params.names.private_configuration.clone(),
        );
        let mut data = storage_secrets;
        data.insert(HTTP_SECRET_KEY.to_string(), http_secret.to_string());
        Self { ctx, target, data }
    }

    fn desired(&self) -> Secret {
        Secret {
            metadata: self.ctx.namespaced_meta(self.target.name()),
            type_: Some("Opaque".to_string()),
            data: Some(
                self.data
                    .iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Secret::default()
        }
    }
}

#[async_trait]
impl Mutator for PrivateConfigurationMutator {
    type Object = Secret;

    fn kind(&self) -> &'static str {
        "Secret"
    }

    fn name(&self) -> String {
        object::describe(self.kind(), Some(self.ctx.namespace()), self.target.name())
    }

    fn owned(&self) -> bool {
        true
    }

    async fn get(&self) -> Result<Secret> {
        self.target.get().await
    }

    async fn create(&self) -> Result<Secret> {
        self.target.create(&object::with_checksum(self.desired())?).await
    }

    async fn update(&self, current: Secret) -> Result<Option<Secret>> {
        merge_checksummed(current, &self.desired(), |current, desired| {
            current.data.clone_from(&desired.data);
            current.string_data = None;
            current.type_.clone_from(&desired.type_);
        })
    }

    async fn replace(&self, updated: Secret) -> Result<Secret> {
        self.target.replace(&updated).await
    }

    async fn delete(&self, params: &DeleteParams) -> Result<()> {
        self.target.delete(params).await
    }
}
