//! # ClusterOperator status
//!
//! Reports the registry's health to the cluster version operator. The
//! ClusterOperator object belongs to the cluster, so this mutator only ever
//! creates a bare object and writes its status subresource; it is never
//! deleted with the Config.

use super::MutatorContext;
use crate::constants::{CONFIG_RESOURCE_NAME, OPERATOR_GROUP};
use crate::controller::apply::Mutator;
use crate::controller::conditions::{self, DeploymentCounters};
use crate::controller::object;
use crate::crd::{
    condition_types, ClusterOperator, ClusterOperatorSpec, ClusterOperatorStatus, Condition,
    OperandVersion, RelatedObject,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::Api;
use serde_json::json;

/// Outcome of the pass the status is written for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    /// The pass completed; Degraded clears
    Healthy,
    /// The pass failed; Degraded is set with the error's reason and message
    Failed { reason: String, message: String },
    /// The registry is intentionally removed
    Removed,
    /// Recompute the deployment axes and leave Degraded as it is
    Refresh,
}

/// Status to report given the current one, the registry deployment and the
/// pass outcome. `None` when nothing observable changes.
#[must_use]
pub fn desired_status(
    current: &ClusterOperatorStatus,
    report: &StatusReport,
    deployment: Option<&DeploymentCounters>,
    related_objects: Vec<RelatedObject>,
    now: &str,
) -> Option<ClusterOperatorStatus> {
    let mut status = current.clone();

    let axes: Vec<Condition> = match report {
        StatusReport::Removed => conditions::removed(),
        StatusReport::Healthy => vec![
            conditions::available(deployment),
            conditions::progressing(deployment),
            conditions::degraded(None),
        ],
        StatusReport::Failed { reason, message } => vec![
            conditions::available(deployment),
            conditions::progressing(deployment),
            conditions::degraded(Some((reason, message))),
        ],
        StatusReport::Refresh => {
            let mut axes = vec![
                conditions::available(deployment),
                conditions::progressing(deployment),
            ];
            if conditions::find(&status.conditions, condition_types::DEGRADED).is_none() {
                axes.push(conditions::degraded(None));
            }
            axes
        }
    };
    let mut changed = conditions::set_conditions(&mut status.conditions, axes, now);

    if status.related_objects != related_objects {
        status.related_objects = related_objects;
        changed = true;
    }

    let versions = vec![OperandVersion {
        name: "operator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }];
    if status.versions != versions {
        status.versions = versions;
        changed = true;
    }

    changed.then_some(status)
}

#[derive(Debug)]
pub struct ClusterOperatorMutator {
    ctx: MutatorContext,
    api: Api<ClusterOperator>,
    deployments: Api<Deployment>,
    report: StatusReport,
}

impl ClusterOperatorMutator {
    #[must_use]
    pub fn new(ctx: MutatorContext, report: StatusReport) -> Self {
        let api = Api::all(ctx.client.clone());
        let deployments = Api::namespaced(ctx.client.clone(), ctx.namespace());
        Self {
            ctx,
            api,
            deployments,
            report,
        }
    }

    fn operator_name(&self) -> &str {
        &self.ctx.params.operator_name
    }

    fn related_objects(&self) -> Vec<RelatedObject> {
        vec![
            RelatedObject {
                group: OPERATOR_GROUP.to_string(),
                resource: "configs".to_string(),
                namespace: String::new(),
                name: CONFIG_RESOURCE_NAME.to_string(),
            },
            RelatedObject {
                group: String::new(),
                resource: "namespaces".to_string(),
                namespace: String::new(),
                name: self.ctx.namespace().to_string(),
            },
        ]
    }

    async fn deployment(&self) -> Result<Option<DeploymentCounters>> {
        Ok(self
            .deployments
            .get_opt(&self.ctx.params.deployment.name)
            .await?
            .as_ref()
            .map(DeploymentCounters::from_deployment))
    }

    async fn compute(
        &self,
        current: &ClusterOperatorStatus,
    ) -> Result<Option<ClusterOperatorStatus>> {
        let deployment = self.deployment().await?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        Ok(desired_status(
            current,
            &self.report,
            deployment.as_ref(),
            self.related_objects(),
            &now,
        ))
    }

    async fn write_status(
        &self,
        resource_version: Option<String>,
        status: &ClusterOperatorStatus,
    ) -> Result<ClusterOperator> {
        // resourceVersion turns the merge patch into a guarded write
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        Ok(self
            .api
            .patch_status(self.operator_name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }
}

#[async_trait]
impl Mutator for ClusterOperatorMutator {
    type Object = ClusterOperator;

    fn kind(&self) -> &'static str {
        "ClusterOperator"
    }

    fn name(&self) -> String {
        object::describe(self.kind(), None, self.operator_name())
    }

    fn owned(&self) -> bool {
        false
    }

    async fn get(&self) -> Result<ClusterOperator> {
        Ok(self.api.get(self.operator_name()).await?)
    }

    async fn create(&self) -> Result<ClusterOperator> {
        let created = self
            .api
            .create(
                &PostParams::default(),
                &ClusterOperator::new(self.operator_name(), ClusterOperatorSpec {}),
            )
            .await?;
        let status = self
            .compute(&ClusterOperatorStatus::default())
            .await?
            .ok_or_else(|| Error::Other(anyhow::anyhow!("empty initial cluster operator status")))?;
        self.write_status(created.metadata.resource_version, &status).await
    }

    async fn update(&self, current: ClusterOperator) -> Result<Option<ClusterOperator>> {
        let status = current.status.clone().unwrap_or_default();
        Ok(self.compute(&status).await?.map(|status| ClusterOperator {
            status: Some(status),
            ..current
        }))
    }

    async fn replace(&self, updated: ClusterOperator) -> Result<ClusterOperator> {
        let status = updated.status.unwrap_or_default();
        self.write_status(updated.metadata.resource_version, &status).await
    }

    async fn delete(&self, params: &DeleteParams) -> Result<()> {
        self.api.delete(self.operator_name(), params).await?;
        Ok(())
    }
}
