use super::pod_template::{self, TemplateInputs};
use super::{merge_checksummed, MutatorContext, StorageContribution, Target};
use crate::constants::SUPPLEMENTAL_GROUPS_ANNOTATION;
use crate::controller::apply::Mutator;
use crate::controller::object;
use crate::crd::ConfigSpec;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::DeleteParams;
use kube::Api;
use std::collections::BTreeMap;

/// Deployment annotation naming the storage backend the pods are wired to
pub const STORAGE_TYPE_ANNOTATION: &str = "imageregistry.operator.openshift.io/storage-type";

/// First group of a `<start>/<size>` or `<start>-<end>` range
#[must_use]
pub fn parse_supplemental_group(range: &str) -> Option<i64> {
    range
        .split(',')
        .next()?
        .split(['/', '-'])
        .next()?
        .trim()
        .parse()
        .ok()
}

#[derive(Debug)]
pub struct DeploymentMutator {
    ctx: MutatorContext,
    target: Target<Deployment>,
    spec: ConfigSpec,
    storage: StorageContribution,
}

impl DeploymentMutator {
    #[must_use]
    pub fn new(ctx: MutatorContext, spec: ConfigSpec, storage: StorageContribution) -> Self {
        let target = Target::new(
            Api::namespaced(ctx.client.clone(), ctx.namespace()),
            ctx.params.deployment.name.clone(),
        );
        Self {
            ctx,
            target,
            spec,
            storage,
        }
    }

    async fn template_inputs(&self) -> Result<TemplateInputs> {
        let client = self.ctx.client.clone();
        let namespace = self.ctx.namespace();
        let names = &self.ctx.params.names;

        let secret_checksum = Api::<Secret>::namespaced(client.clone(), namespace)
            .get_opt(&names.private_configuration)
            .await?
            .map(|s| object::checksum(&s.data))
            .transpose()?;
        let certificates_checksum = Api::<ConfigMap>::namespaced(client.clone(), namespace)
            .get_opt(&names.certificates)
            .await?
            .map(|cm| object::checksum(&cm.data))
            .transpose()?;
        let fs_group = Api::<Namespace>::all(client)
            .get_opt(namespace)
            .await?
            .and_then(|ns| ns.metadata.annotations)
            .and_then(|a| a.get(SUPPLEMENTAL_GROUPS_ANNOTATION).cloned())
            .and_then(|range| parse_supplemental_group(&range));

        Ok(TemplateInputs {
            storage: self.storage.clone(),
            secret_checksum,
            certificates_checksum,
            fs_group,
        })
    }

    async fn desired(&self) -> Result<Deployment> {
        let params = &self.ctx.params;
        let inputs = self.template_inputs().await?;
        let template = pod_template::build(params, &self.spec, &inputs)?;

        let mut metadata = self.ctx.namespaced_meta(self.target.name());
        metadata.labels = Some(params.deployment.labels.clone());
        metadata.annotations = Some(BTreeMap::from([(
            STORAGE_TYPE_ANNOTATION.to_string(),
            self.storage.storage_type.clone(),
        )]));

        Ok(Deployment {
            metadata,
            spec: Some(DeploymentSpec {
                replicas: Some(self.spec.replicas),
                selector: LabelSelector {
                    match_labels: Some(params.deployment.labels.clone()),
                    ..LabelSelector::default()
                },
                template,
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        })
    }
}

#[async_trait]
impl Mutator for DeploymentMutator {
    type Object = Deployment;

    fn kind(&self) -> &'static str {
        "Deployment"
    }

    fn name(&self) -> String {
        object::describe(self.kind(), Some(self.ctx.namespace()), self.target.name())
    }

    fn owned(&self) -> bool {
        true
    }

    async fn get(&self) -> Result<Deployment> {
        self.target.get().await
    }

    async fn create(&self) -> Result<Deployment> {
        self.target.create(&object::with_checksum(self.desired().await?)?).await
    }

    async fn update(&self, current: Deployment) -> Result<Option<Deployment>> {
        merge_checksummed(current, &self.desired().await?, |current, desired| {
            current.spec.clone_from(&desired.spec);
        })
    }

    async fn replace(&self, updated: Deployment) -> Result<Deployment> {
        self.target.replace(&updated).await
    }

    async fn delete(&self, params: &DeleteParams) -> Result<()> {
        self.target.delete(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supplemental_group_ranges() {
        assert_eq!(parse_supplemental_group("1000660000/10000"), Some(1_000_660_000));
        assert_eq!(parse_supplemental_group("1000-2000"), Some(1000));
        assert_eq!(parse_supplemental_group("5000/100,6000/100"), Some(5000));
        assert_eq!(parse_supplemental_group("garbage"), None);
        assert_eq!(parse_supplemental_group(""), None);
    }
}
