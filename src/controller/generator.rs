//! # Generator
//!
//! Orchestrates one pass over the registry objects.
//!
//! - [`Generator::apply`] syncs the remote storage and records its identity
//!   on the Config status, converges every managed object in dependency
//!   order, collects obsolete routes and stores the applied storage snapshot.
//! - [`Generator::remove`] deletes the owned objects and tears down storage
//!   the operator created.
//! - [`Generator::apply_cluster_operator`] refreshes the ClusterOperator
//!   status without touching anything else.
//!
//! A failed `apply` still reports Degraded on the ClusterOperator before the
//! error is returned.

use crate::config::{ControllerConfig, Parameters};
use crate::controller::apply::ApplyOutcome;
use crate::controller::backoff::ConflictBackoff;
use crate::controller::mutators::{
    pod_template, CertificatesMutator, ClusterOperatorMutator, ClusterRoleBindingMutator,
    ClusterRoleMutator, DeploymentMutator, MutatorContext, PrivateConfigurationMutator,
    ResourceMutator, RouteMutator, ServiceAccountMutator, ServiceCaMutator, ServiceMutator,
    StatusReport, StorageContribution, HTTP_SECRET_KEY,
};
use crate::controller::reconciler::status::record_storage;
use crate::controller::{object, routes};
use crate::crd::{Config, ManagementState};
use crate::error::Result;
use crate::storage::{
    remove_storage_with_retry, sync_storage, ConfigState, Credentials, Driver, StorageContext,
};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, PropagationPolicy};
use kube::{Api, Client};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What an apply pass did
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Outcome per managed object, in apply order
    pub outcomes: Vec<(String, ApplyOutcome)>,
    /// Routes deleted because the Config no longer asks for them
    pub removed_routes: Vec<String>,
    /// Storage snapshot persisted by the pass
    pub storage: ConfigState,
    /// Writes of the storage identity to the status and the state config map
    pub state_writes: usize,
}

impl ApplyReport {
    /// Number of objects created or updated
    #[must_use]
    pub fn writes(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o != ApplyOutcome::Unchanged)
            .count()
            + self.removed_routes.len()
            + self.state_writes
    }
}

/// A random 64 character hex secret for signing registry upload state
#[must_use]
pub fn generate_http_secret() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

pub struct Generator {
    client: Client,
    params: Arc<Parameters>,
    backoff: ConflictBackoff,
    removal_interval: Duration,
    removal_timeout: Duration,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("namespace", &self.params.namespace)
            .field("backoff", &self.backoff)
            .field("removal_interval", &self.removal_interval)
            .field("removal_timeout", &self.removal_timeout)
            .finish_non_exhaustive()
    }
}

impl Generator {
    #[must_use]
    pub fn new(client: Client, params: Arc<Parameters>, config: &ControllerConfig) -> Self {
        Self {
            client,
            params,
            backoff: ConflictBackoff::from_config(config),
            removal_interval: config.storage_removal_interval(),
            removal_timeout: config.storage_removal_timeout(),
        }
    }

    #[must_use]
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    fn context(&self, cr: &Config) -> Result<MutatorContext> {
        Ok(MutatorContext {
            client: self.client.clone(),
            params: Arc::clone(&self.params),
            owner: object::owner_reference(cr)?,
        })
    }

    async fn storage_context(&self) -> Result<StorageContext> {
        let namespace = self.params.namespace.clone();
        let credentials = Credentials::load(
            self.client.clone(),
            &namespace,
            &self.params.names.user_configuration,
        )
        .await?;
        Ok(StorageContext {
            client: self.client.clone(),
            namespace,
            secret_name: self.params.names.private_configuration.clone(),
            credentials,
        })
    }

    /// Snapshot the pass starts from, with the one in the state config map
    async fn previous_state(&self, cr: &Config) -> Result<(ConfigState, Option<ConfigState>)> {
        let stored = ConfigState::load(
            self.client.clone(),
            &self.params.namespace,
            &self.params.names.config_state,
        )
        .await?;
        Ok((ConfigState::resolve(stored.as_ref(), cr.status.as_ref()), stored))
    }

    /// The Config's HTTP secret, else the one already deployed, else a new one
    async fn http_secret(&self, cr: &Config) -> Result<String> {
        if !cr.spec.http_secret.is_empty() {
            return Ok(cr.spec.http_secret.clone());
        }
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.params.namespace);
        let deployed = secrets
            .get_opt(&self.params.names.private_configuration)
            .await?
            .and_then(|s| s.data)
            .and_then(|mut d| d.remove(HTTP_SECRET_KEY))
            .and_then(|v| String::from_utf8(v.0).ok())
            .filter(|v| !v.is_empty());
        Ok(deployed.unwrap_or_else(generate_http_secret))
    }

    /// Managed objects in apply order, the ClusterOperator last
    fn mutators(
        &self,
        ctx: &MutatorContext,
        cr: &Config,
        storage: StorageContribution,
        http_secret: &str,
        report: StatusReport,
    ) -> Vec<ResourceMutator> {
        let spec = &cr.spec;
        let mut mutators = vec![
            ResourceMutator::ClusterRole(ClusterRoleMutator::new(ctx.clone())),
            ResourceMutator::ClusterRoleBinding(ClusterRoleBindingMutator::new(ctx.clone())),
            ResourceMutator::ServiceAccount(ServiceAccountMutator::new(ctx.clone())),
            ResourceMutator::ServiceCa(ServiceCaMutator::new(ctx.clone())),
            ResourceMutator::Certificates(CertificatesMutator::new(ctx.clone())),
            ResourceMutator::PrivateConfiguration(PrivateConfigurationMutator::new(
                ctx.clone(),
                storage.secrets.clone(),
                http_secret,
            )),
            ResourceMutator::Service(ServiceMutator::new(ctx.clone(), spec.tls)),
            ResourceMutator::Deployment(DeploymentMutator::new(ctx.clone(), spec.clone(), storage)),
        ];
        mutators.extend(
            routes::desired_routes(spec, &self.params)
                .into_iter()
                .map(|route| {
                    ResourceMutator::Route(RouteMutator::new(ctx.clone(), route, spec.tls))
                }),
        );
        mutators.push(ResourceMutator::ClusterOperator(ClusterOperatorMutator::new(
            ctx.clone(),
            report,
        )));
        mutators
    }

    /// Converge every registry object to the Config
    pub async fn apply(&self, cr: &Config) -> Result<ApplyReport> {
        let ctx = self.context(cr)?;
        match self.try_apply(&ctx, cr).await {
            Ok(report) => Ok(report),
            Err(err) => {
                let report = StatusReport::Failed {
                    reason: err.reason().to_string(),
                    message: err.to_string(),
                };
                if let Err(status_err) = self.report_status(&ctx, report).await {
                    warn!("unable to report degraded cluster operator status: {status_err}");
                }
                Err(err)
            }
        }
    }

    async fn try_apply(&self, ctx: &MutatorContext, cr: &Config) -> Result<ApplyReport> {
        pod_template::validate(&cr.spec)?;

        let (previous, stored) = self.previous_state(cr).await?;
        let driver = Driver::new(&cr.spec.storage, &previous, self.storage_context().await?)?;
        let state = sync_storage(&driver, cr, &previous).await?;

        let mut report = ApplyReport::default();
        if state != previous && record_storage(self.client.clone(), cr, &state).await? {
            report.state_writes += 1;
        }

        let storage = StorageContribution::from_driver(&driver);
        let http_secret = self.http_secret(cr).await?;
        for mutator in self.mutators(ctx, cr, storage, &http_secret, StatusReport::Healthy) {
            let outcome = mutator.apply(&self.backoff).await?;
            report.outcomes.push((mutator.name(), outcome));
        }

        let desired: BTreeSet<String> = routes::desired_routes(&cr.spec, &self.params)
            .into_iter()
            .map(|r| r.name)
            .collect();
        report.removed_routes = routes::remove_obsolete_routes(
            self.client.clone(),
            &self.params.namespace,
            &desired,
            &ctx.owner.uid,
            &self.backoff,
        )
        .await?;

        if stored.as_ref() != Some(&state) {
            state
                .save(
                    self.client.clone(),
                    &self.params.namespace,
                    &self.params.names.config_state,
                    ctx.owner.clone(),
                )
                .await?;
            report.state_writes += 1;
        }
        report.storage = state;

        debug!(writes = report.writes(), "apply pass finished");
        Ok(report)
    }

    /// Delete every owned object and the storage the operator created
    pub async fn remove(&self, cr: &Config) -> Result<()> {
        let ctx = self.context(cr)?;
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..DeleteParams::default()
        };

        let mutators = self.mutators(
            &ctx,
            cr,
            StorageContribution::default(),
            "",
            StatusReport::Removed,
        );
        for mutator in mutators.iter().rev().filter(|m| m.owned()) {
            mutator.delete(&params, &self.backoff).await?;
        }

        let removed = routes::remove_obsolete_routes(
            self.client.clone(),
            &self.params.namespace,
            &BTreeSet::new(),
            &ctx.owner.uid,
            &self.backoff,
        )
        .await?;
        if !removed.is_empty() {
            info!(routes = ?removed, "routes removed");
        }

        let (state, _) = self.previous_state(cr).await?;
        if state.storage_managed {
            if let Some(driver) = Driver::from_state(&state, self.storage_context().await?)? {
                remove_storage_with_retry(&driver, cr, self.removal_interval, self.removal_timeout)
                    .await?;
            }
        } else if !state.storage.is_empty() {
            info!("storage was not created by the operator, leaving it in place");
        }

        ConfigState::delete(
            self.client.clone(),
            &self.params.namespace,
            &self.params.names.config_state,
        )
        .await
    }

    /// Refresh the ClusterOperator status for the Config's management state
    pub async fn apply_cluster_operator(&self, cr: &Config) -> Result<()> {
        let report = match cr.spec.management_state {
            ManagementState::Removed => StatusReport::Removed,
            ManagementState::Managed | ManagementState::Unmanaged => StatusReport::Refresh,
        };
        self.report_status(&self.context(cr)?, report).await
    }

    async fn report_status(&self, ctx: &MutatorContext, report: StatusReport) -> Result<()> {
        let mutator =
            ResourceMutator::ClusterOperator(ClusterOperatorMutator::new(ctx.clone(), report));
        mutator.apply(&self.backoff).await.map(|_| ())
    }
}
