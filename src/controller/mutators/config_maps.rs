//! Service CA bundle config maps.
//!
//! `serviceca` is an empty config map the service CA operator injects its
//! bundle into; only its metadata is ours. `image-registry-certificates`
//! republishes that bundle under the registry's host names so clients
//! mounting it trust the registry's serving certificate.

use super::{merge_checksummed, MutatorContext, Target};
use crate::constants::INJECT_CABUNDLE_ANNOTATION;
use crate::controller::apply::Mutator;
use crate::controller::object;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::DeleteParams;
use kube::Api;
use std::collections::BTreeMap;

/// Key the service CA operator writes the bundle to
pub const SERVICE_CA_KEY: &str = "service-ca.crt";

#[derive(Debug)]
pub struct ServiceCaMutator {
    ctx: MutatorContext,
    target: Target<ConfigMap>,
}

impl ServiceCaMutator {
    #[must_use]
    pub fn new(ctx: MutatorContext) -> Self {
        let target = Target::new(
            Api::namespaced(ctx.client.clone(), ctx.namespace()),
            ctx.params.names.service_ca.clone(),
        );
        Self { ctx, target }
    }

    fn desired(&self) -> ConfigMap {
        let mut metadata = self.ctx.namespaced_meta(self.target.name());
        metadata.annotations = Some(BTreeMap::from([(
            INJECT_CABUNDLE_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
        ConfigMap {
            metadata,
            ..ConfigMap::default()
        }
    }
}

#[async_trait]
impl Mutator for ServiceCaMutator {
    type Object = ConfigMap;

    fn kind(&self) -> &'static str {
        "ConfigMap"
    }

    fn name(&self) -> String {
        object::describe(self.kind(), Some(self.ctx.namespace()), self.target.name())
    }

    fn owned(&self) -> bool {
        true
    }

    async fn get(&self) -> Result<ConfigMap> {
        self.target.get().await
    }

    async fn create(&self) -> Result<ConfigMap> {
        self.target.create(&self.desired()).await
    }

    async fn update(&self, current: ConfigMap) -> Result<Option<ConfigMap>> {
        let mut updated = current.clone();
        object::merge_object_meta(&mut updated.metadata, &self.desired().metadata);
        Ok((updated.metadata != current.metadata).then_some(updated))
    }

    async fn replace(&self, updated: ConfigMap) -> Result<ConfigMap> {
        self.target.replace(&updated).await
    }

    async fn delete(&self, params: &DeleteParams) -> Result<()> {
        self.target.delete(params).await
    }
}

/// Bundle keyed by host name; `:` is not allowed in keys and becomes `..`
#[must_use]
pub fn certificate_data(bundle: Option<&str>, hostnames: &[String]) -> BTreeMap<String, String> {
    let Some(bundle) = bundle.filter(|b| !b.is_empty()) else {
        return BTreeMap::new();
    };
    hostnames
        .iter()
        .map(|host| (host.replace(':', ".."), bundle.to_string()))
        .collect()
}

#[derive(Debug)]
pub struct CertificatesMutator {
    ctx: MutatorContext,
    target: Target<ConfigMap>,
    service_ca: Api<ConfigMap>,
}

impl CertificatesMutator {
    #[must_use]
    pub fn new(ctx: MutatorContext) -> Self {
        let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ctx.namespace());
        let target = Target::new(api.clone(), ctx.params.names.certificates.clone());
        Self {
            ctx,
            target,
            service_ca: api,
        }
    }

    async fn desired(&self) -> Result<ConfigMap> {
        // Not injected yet on a fresh cluster; publish an empty bundle until then
        let bundle = self
            .service_ca
            .get_opt(&self.ctx.params.names.service_ca)
            .await?
            .and_then(|cm| cm.data)
            .and_then(|mut data| data.remove(SERVICE_CA_KEY));
        let data = certificate_data(bundle.as_deref(), &self.ctx.params.internal_hostnames());
        Ok(ConfigMap {
            metadata: self.ctx.namespaced_meta(self.target.name()),
            data: Some(data),
            ..ConfigMap::default()
        })
    }
}

#[async_trait]
impl Mutator for CertificatesMutator {
    type Object = ConfigMap;

    fn kind(&self) -> &'static str {
        "ConfigMap"
    }

    fn name(&self) -> String {
        object::describe(self.kind(), Some(self.ctx.namespace()), self.target.name())
    }

    fn owned(&self) -> bool {
        true
    }

    async fn get(&self) -> Result<ConfigMap> {
        self.target.get().await
    }

    async fn create(&self) -> Result<ConfigMap> {
        self.target.create(&object::with_checksum(self.desired().await?)?).await
    }

    async fn update(&self, current: ConfigMap) -> Result<Option<ConfigMap>> {
        merge_checksummed(current, &self.desired().await?, |current, desired| {
            current.data.clone_from(&desired.data);
            current.binary_data = None;
        })
    }

    async fn replace(&self, updated: ConfigMap) -> Result<ConfigMap> {
        self.target.replace(&updated).await
    }

    async fn delete(&self, params: &DeleteParams) -> Result<()> {
        self.target.delete(params).await
    }
}
