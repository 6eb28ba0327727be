//! Finalizer guarding storage teardown on Config deletion.

use crate::constants::FINALIZER;
use crate::crd::Config;
use crate::error::Result;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::info;

#[must_use]
pub fn has_finalizer(cr: &Config) -> bool {
    cr.finalizers().iter().any(|f| f == FINALIZER)
}

/// Finalizers after adding ours, `None` when it is already present
#[must_use]
pub fn with_finalizer(cr: &Config) -> Option<Vec<String>> {
    if has_finalizer(cr) {
        return None;
    }
    let mut finalizers = cr.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    Some(finalizers)
}

/// Finalizers after dropping ours, `None` when it is not present
#[must_use]
pub fn without_finalizer(cr: &Config) -> Option<Vec<String>> {
    has_finalizer(cr).then(|| {
        cr.finalizers()
            .iter()
            .filter(|f| *f != FINALIZER)
            .cloned()
            .collect()
    })
}

async fn patch_finalizers(client: Client, cr: &Config, finalizers: Vec<String>) -> Result<()> {
    let api: Api<Config> = Api::all(client);
    // resourceVersion guards against dropping a finalizer added concurrently
    let patch = json!({
        "metadata": {
            "resourceVersion": cr.resource_version(),
            "finalizers": finalizers,
        }
    });
    api.patch(&cr.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

pub async fn ensure_finalizer(client: Client, cr: &Config) -> Result<()> {
    if let Some(finalizers) = with_finalizer(cr) {
        patch_finalizers(client, cr, finalizers).await?;
        info!(finalizer = FINALIZER, "finalizer added");
    }
    Ok(())
}

pub async fn remove_finalizer(client: Client, cr: &Config) -> Result<()> {
    if let Some(finalizers) = without_finalizer(cr) {
        patch_finalizers(client, cr, finalizers).await?;
        info!(finalizer = FINALIZER, "finalizer removed");
    }
    Ok(())
}
