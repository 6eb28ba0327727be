//! # Apply Engine Tests
//!
//! Drives the apply engine with an in-memory object store that keeps
//! resourceVersion tokens and can inject conflicts and API failures.

use async_trait::async_trait;
use image_registry_operator::controller::apply::{self, ApplyOutcome, Mutator};
use image_registry_operator::controller::backoff::ConflictBackoff;
use image_registry_operator::error::{api_error, Error, Result};
use kube::api::DeleteParams;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct StoredObject {
    resource_version: u64,
    value: String,
}

#[derive(Debug, Default)]
struct InMemoryMutator {
    store: Mutex<Option<StoredObject>>,
    desired: String,
    /// Conflicts injected into the next replace calls
    pending_conflicts: AtomicU32,
    /// Status code returned by every get, when set
    get_failure: Option<u16>,
    gets: AtomicU32,
    writes: AtomicU32,
}

impl InMemoryMutator {
    fn new(desired: &str) -> Self {
        Self {
            desired: desired.to_string(),
            ..Self::default()
        }
    }

    fn with_object(self, value: &str) -> Self {
        *self.store.lock().expect("store lock") = Some(StoredObject {
            resource_version: 7,
            value: value.to_string(),
        });
        self
    }

    fn stored(&self) -> Option<StoredObject> {
        self.store.lock().expect("store lock").clone()
    }

    fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mutator for InMemoryMutator {
    type Object = StoredObject;

    fn kind(&self) -> &'static str {
        "InMemory"
    }

    fn name(&self) -> String {
        "InMemory, Namespace=test, Name=object".to_string()
    }

    fn owned(&self) -> bool {
        true
    }

    async fn get(&self) -> Result<StoredObject> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.get_failure {
            return Err(Error::Kube(api_error(code, "InternalError", "etcd unavailable")));
        }
        self.stored()
            .ok_or_else(|| Error::Kube(api_error(404, "NotFound", "object not found")))
    }

    async fn create(&self) -> Result<StoredObject> {
        let created = StoredObject {
            resource_version: 1,
            value: self.desired.clone(),
        };
        *self.store.lock().expect("store lock") = Some(created.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update(&self, current: StoredObject) -> Result<Option<StoredObject>> {
        if current.value == self.desired {
            return Ok(None);
        }
        Ok(Some(StoredObject {
            value: self.desired.clone(),
            ..current
        }))
    }

    async fn replace(&self, updated: StoredObject) -> Result<StoredObject> {
        let mut store = self.store.lock().expect("store lock");
        let current = store.as_mut().expect("replace of a stored object");

        let conflict = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflict {
            // Another writer got there first
            current.resource_version += 1;
        }
        if current.resource_version != updated.resource_version {
            return Err(Error::Kube(api_error(
                409,
                "Conflict",
                "the object has been modified; please apply your changes to the latest version",
            )));
        }

        *current = StoredObject {
            resource_version: updated.resource_version + 1,
            value: updated.value,
        };
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(current.clone())
    }

    async fn delete(&self, _params: &DeleteParams) -> Result<()> {
        let conflict = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflict {
            return Err(Error::Kube(api_error(
                409,
                "Conflict",
                "Operation cannot be fulfilled: the object has been modified",
            )));
        }
        self.store
            .lock()
            .expect("store lock")
            .take()
            .map(|_| ())
            .ok_or_else(|| Error::Kube(api_error(404, "NotFound", "object not found")))
    }
}

fn fast_backoff() -> ConflictBackoff {
    ConflictBackoff {
        steps: 4,
        initial: Duration::from_millis(1),
        factor: 2,
    }
}

#[tokio::test]
async fn test_missing_object_is_created() {
    let mutator = InMemoryMutator::new("v1");
    let outcome = apply::apply(&mutator, &fast_backoff()).await.expect("apply");
    assert_eq!(outcome, ApplyOutcome::Created);
    assert_eq!(mutator.stored().map(|o| o.value).as_deref(), Some("v1"));
    assert_eq!(mutator.writes(), 1);
}

#[tokio::test]
async fn test_second_apply_writes_nothing() {
    let mutator = InMemoryMutator::new("v1");
    apply::apply(&mutator, &fast_backoff()).await.expect("first apply");
    let outcome = apply::apply(&mutator, &fast_backoff()).await.expect("second apply");
    assert_eq!(outcome, ApplyOutcome::Unchanged);
    assert_eq!(mutator.writes(), 1);
}

#[tokio::test]
async fn test_changed_object_is_replaced() {
    let mutator = InMemoryMutator::new("v2").with_object("v1");
    let outcome = apply::apply(&mutator, &fast_backoff()).await.expect("apply");
    assert_eq!(outcome, ApplyOutcome::Updated);
    assert_eq!(
        mutator.stored(),
        Some(StoredObject {
            resource_version: 8,
            value: "v2".to_string()
        })
    );
}

#[tokio::test]
async fn test_single_conflict_is_invisible() {
    let mutator = InMemoryMutator::new("v2").with_object("v1");
    mutator.pending_conflicts.store(1, Ordering::SeqCst);

    let outcome = apply::apply(&mutator, &fast_backoff()).await.expect("apply");
    assert_eq!(outcome, ApplyOutcome::Updated);
    assert_eq!(mutator.stored().map(|o| o.value).as_deref(), Some("v2"));
    assert_eq!(mutator.gets.load(Ordering::SeqCst), 2);
    assert_eq!(mutator.writes(), 1);
}

#[tokio::test]
async fn test_conflicts_beyond_budget_propagate() {
    let mutator = InMemoryMutator::new("v2").with_object("v1");
    mutator.pending_conflicts.store(10, Ordering::SeqCst);

    let err = apply::apply(&mutator, &fast_backoff())
        .await
        .expect_err("conflict budget exhausted");
    assert!(err.is_conflict());
    assert!(err.to_string().contains("InMemory, Namespace=test, Name=object"));
    assert_eq!(mutator.gets.load(Ordering::SeqCst), 4);
    assert_eq!(mutator.stored().map(|o| o.value).as_deref(), Some("v1"));
}

#[tokio::test]
async fn test_other_api_errors_abort_without_retry() {
    let mutator = InMemoryMutator {
        get_failure: Some(500),
        ..InMemoryMutator::new("v1")
    };
    let err = apply::apply(&mutator, &fast_backoff())
        .await
        .expect_err("server error");
    assert_eq!(err.api_code(), Some(500));
    assert_eq!(mutator.gets.load(Ordering::SeqCst), 1);
    assert_eq!(mutator.writes(), 0);
}

#[tokio::test]
async fn test_delete_tolerates_missing_object() {
    let mutator = InMemoryMutator::new("v1").with_object("v1");
    apply::delete(&mutator, &DeleteParams::default(), &fast_backoff())
        .await
        .expect("delete");
    assert!(mutator.stored().is_none());
    apply::delete(&mutator, &DeleteParams::default(), &fast_backoff())
        .await
        .expect("second delete is a no-op");
}

#[tokio::test]
async fn test_delete_retries_a_conflict() {
    let mutator = InMemoryMutator::new("v1").with_object("v1");
    mutator.pending_conflicts.store(1, Ordering::SeqCst);
    apply::delete(&mutator, &DeleteParams::default(), &fast_backoff())
        .await
        .expect("conflict is retried");
    assert!(mutator.stored().is_none());
    assert_eq!(mutator.pending_conflicts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_delete_conflicts_beyond_budget_propagate() {
    let mutator = InMemoryMutator::new("v1").with_object("v1");
    mutator.pending_conflicts.store(10, Ordering::SeqCst);
    let err = apply::delete(&mutator, &DeleteParams::default(), &fast_backoff())
        .await
        .expect_err("conflict budget exhausted");
    assert!(err.is_conflict());
    assert_eq!(mutator.pending_conflicts.load(Ordering::SeqCst), 6);
    assert!(mutator.stored().is_some());
}
