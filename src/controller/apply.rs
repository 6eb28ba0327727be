//! # Apply Engine
//!
//! Idempotent create-or-update of one managed object.
//!
//! A [`Mutator`] knows how to read, create, merge and write one object. The
//! engine drives it:
//!
//! 1. `get` the current object
//! 2. not found: `create` the desired object
//! 3. otherwise merge the desired state into a clone of the current object
//!    with `update`; the current copy is kept untouched for the diff log
//! 4. when `update` reports a change, `replace` writes the clone back
//!
//! The sequence is retried from step 1 when the API server reports a
//! resourceVersion conflict, and so are deletes. Any other error aborts.

use crate::controller::backoff::{retry_on_conflict, ConflictBackoff};
use crate::controller::object;
use crate::error::{Error, Result};
use crate::observability::metrics;
use async_trait::async_trait;
use kube::api::DeleteParams;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info};

/// Per-kind access to one managed object
#[async_trait]
pub trait Mutator: Send + Sync {
    type Object: Clone + Debug + Serialize + Send + Sync;

    /// Kind name used in logs and metric labels
    fn kind(&self) -> &'static str;

    /// `Kind, Namespace=<ns>, Name=<name>`
    fn name(&self) -> String;

    /// Whether the object is controlled by the Config and removed with it
    fn owned(&self) -> bool;

    /// Current object; a 404 is reported through [`Error::is_not_found`]
    async fn get(&self) -> Result<Self::Object>;

    /// Create the desired object
    async fn create(&self) -> Result<Self::Object>;

    /// Merge the desired state into `current`; `None` when nothing changed
    async fn update(&self, current: Self::Object) -> Result<Option<Self::Object>>;

    /// Write an updated object back, guarded by its resourceVersion
    async fn replace(&self, updated: Self::Object) -> Result<Self::Object>;

    async fn delete(&self, params: &DeleteParams) -> Result<()>;
}

/// What one pass did to one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Converge one object, retrying on conflicts
pub async fn apply<M>(mutator: &M, backoff: &ConflictBackoff) -> Result<ApplyOutcome>
where
    M: Mutator + ?Sized,
{
    retry_on_conflict(backoff, mutator.kind(), || apply_once(mutator))
        .await
        .map_err(|err| Error::apply(mutator.name(), err))
}

async fn apply_once<M>(mutator: &M) -> Result<ApplyOutcome>
where
    M: Mutator + ?Sized,
{
    let current = match mutator.get().await {
        Ok(current) => current,
        Err(err) if err.is_not_found() => {
            let created = mutator.create().await?;
            metrics::record_object_operation(mutator.kind(), "create");
            info!(object = %mutator.name(), "object created");
            if let Ok(dump) = serde_yaml::to_string(&created) {
                debug!(object = %mutator.name(), "created:\n{dump}");
            }
            return Ok(ApplyOutcome::Created);
        }
        Err(err) => return Err(err),
    };

    let Some(updated) = mutator.update(current.clone()).await? else {
        debug!(object = %mutator.name(), "object is up to date");
        return Ok(ApplyOutcome::Unchanged);
    };

    let paths = object::changed_paths(&current, &updated)?;
    mutator.replace(updated).await?;
    metrics::record_object_operation(mutator.kind(), "update");
    info!(object = %mutator.name(), changed = ?paths, "object updated");
    Ok(ApplyOutcome::Updated)
}

/// Delete the object, retrying on conflicts and treating an already missing
/// object as success
pub async fn delete<M>(mutator: &M, params: &DeleteParams, backoff: &ConflictBackoff) -> Result<()>
where
    M: Mutator + ?Sized,
{
    match retry_on_conflict(backoff, mutator.kind(), || mutator.delete(params)).await {
        Ok(()) => {
            metrics::record_object_operation(mutator.kind(), "delete");
            info!(object = %mutator.name(), "object deleted");
            Ok(())
        }
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(Error::apply(mutator.name(), err)),
    }
}
