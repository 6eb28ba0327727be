//! # Image Registry Operator
//!
//! Kubernetes operator that deploys the cluster image registry from the
//! singleton `Config` resource named `cluster`.
//!
//! On start-up it creates the default Config if none exists and publishes
//! the ClusterOperator status, then watches the Config and every object it
//! manages:
//!
//! 1. **Storage** - Creates or adopts the bucket or container of the
//!    configured backend (filesystem, S3, GCS, Azure Blob or Swift)
//! 2. **Registry objects** - RBAC, service account, CA config maps, private
//!    configuration secret, service, deployment and routes
//! 3. **Status** - Config conditions and the ClusterOperator
//!    Available/Progressing/Degraded axes
//!
//! Metrics and probes are served on `METRICS_PORT`.

use anyhow::Result;
use image_registry_operator::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.client, init.reconciler, init.params, init.server_state).await
}
