//! # Reconcile
//!
//! One pass over the singleton Config, dispatched on its management state.
//!
//! - `Managed`: ensure the finalizer, run the generator's apply pass and
//!   record the result on the Config status.
//! - `Removed`: tear the registry down and report it as removed.
//! - `Unmanaged`: leave every object alone and only refresh the
//!   ClusterOperator status.
//!
//! A Config marked for deletion runs the removal pass; the finalizer is
//! cleared only once that pass succeeds.

use super::finalizer;
use super::status::{update_status, PassOutcome};
use super::types::Reconciler;
use crate::constants::CONFIG_RESOURCE_NAME;
use crate::crd::{Config, ManagementState};
use crate::error::Error;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub async fn reconcile(cr: Arc<Config>, ctx: Arc<Reconciler>) -> Result<Action, Error> {
    let name = cr.name_any();
    if name != CONFIG_RESOURCE_NAME {
        warn!(
            "ignoring Config {name}: only the Config named {CONFIG_RESOURCE_NAME} is reconciled"
        );
        return Ok(Action::await_change());
    }

    let start = Instant::now();
    metrics::increment_reconciliations();

    let result = if cr.metadata.deletion_timestamp.is_some() {
        finalize(&cr, &ctx).await
    } else {
        match cr.spec.management_state {
            ManagementState::Managed => apply(&cr, &ctx).await,
            ManagementState::Removed => remove(&cr, &ctx).await,
            ManagementState::Unmanaged => {
                debug!("registry is unmanaged, refreshing cluster operator status only");
                ctx.generator.apply_cluster_operator(&cr).await
            }
        }
    };
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    result?;

    if ctx.reset_backoff(&name) {
        info!("reconcile succeeded after earlier failures, backoff reset");
    }
    if cr.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    Ok(Action::requeue(ctx.config.resync_interval()))
}

async fn apply(cr: &Config, ctx: &Reconciler) -> Result<(), Error> {
    finalizer::ensure_finalizer(ctx.client.clone(), cr).await?;

    let params = ctx.generator.params();
    match ctx.generator.apply(cr).await {
        Ok(report) => {
            if report.writes() > 0 {
                info!(writes = report.writes(), "registry objects converged");
            }
            update_status(ctx.client.clone(), cr, &PassOutcome::Applied(&report), params).await?;
            Ok(())
        }
        Err(err) => {
            if let Err(status_err) =
                update_status(ctx.client.clone(), cr, &PassOutcome::Failed(&err), params).await
            {
                warn!("unable to record the failed pass on the config status: {status_err}");
            }
            Err(err)
        }
    }
}

async fn remove(cr: &Config, ctx: &Reconciler) -> Result<(), Error> {
    ctx.generator.remove(cr).await?;
    // Nothing is left to tear down on deletion
    finalizer::remove_finalizer(ctx.client.clone(), cr).await?;
    ctx.generator.apply_cluster_operator(cr).await?;
    update_status(
        ctx.client.clone(),
        cr,
        &PassOutcome::Removed,
        ctx.generator.params(),
    )
    .await
    .map(|_| ())
}

async fn finalize(cr: &Config, ctx: &Reconciler) -> Result<(), Error> {
    if !finalizer::has_finalizer(cr) {
        return Ok(());
    }
    info!("config is being deleted, removing the registry");
    ctx.generator.remove(cr).await?;
    finalizer::remove_finalizer(ctx.client.clone(), cr).await
}
