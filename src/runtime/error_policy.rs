//! # Error Policy
//!
//! Requeue policy for failed reconcile passes and classification of watch
//! stream errors.

use crate::controller::reconciler::Reconciler;
use crate::crd::Config;
use crate::error::Error;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue after a failed pass with per-Config Fibonacci backoff.
///
/// Configuration errors wait for the Config to change instead.
pub fn handle_reconciliation_error(obj: Arc<Config>, error: &Error, ctx: Arc<Reconciler>) -> Action {
    let name = obj.name_any();
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        resource.name = name.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    metrics::increment_reconciliation_errors();

    if error.is_configuration() {
        error!("invalid registry configuration, waiting for the Config to change: {error}");
        return Action::await_change();
    }
    error!("reconcile failed: {error}");

    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(name.clone())
                .or_insert_with(|| ctx.new_backoff_state());
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("failed to lock backoff states: {e}, using the maximum backoff");
            (ctx.config.error_backoff_max_secs, 0)
        }
    };

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        error_count,
        "retrying in {backoff_seconds}s at {}",
        next_trigger_time.to_rfc3339()
    );
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// What a watch stream error means for the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// Missing object or CRD; the stream keeps going
    NotFound,
    /// Credentials rejected or RBAC revoked
    Unauthorized,
    /// Resource version expired; the watch restarts with a fresh list
    Expired,
    /// API server throttling or storage reinitialising
    Throttled,
    Other,
}

#[must_use]
pub fn classify_watch_error(error: &str) -> WatchErrorKind {
    // 404 first: a plain-text 404 body surfaces as a WatchFailed error too
    if error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found") {
        WatchErrorKind::NotFound
    } else if error.contains("401") || error.contains("Unauthorized") {
        WatchErrorKind::Unauthorized
    } else if error.contains("410")
        || error.contains("too old resource version")
        || error.contains("Expired")
        || error.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error.contains("429")
        || error.contains("TooManyRequests")
        || error.contains("storage is (re)initializing")
    {
        WatchErrorKind::Throttled
    } else {
        WatchErrorKind::Other
    }
}

/// Handle one watch stream error.
///
/// Returns `Some(())` when the stream can continue, `None` when the error
/// is dropped and the watch left to restart.
pub async fn handle_watch_stream_error(
    error: &str,
    backoff_ms: &AtomicU64,
    max_backoff_ms: u64,
    restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(tracing::Level::WARN, "controller.watch.error", error = %error);
    let _error_guard = error_span.enter();

    match classify_watch_error(error) {
        WatchErrorKind::NotFound => {
            warn!("watched resource not found, the CRD may be missing: {error}");
            Some(())
        }
        WatchErrorKind::Unauthorized => {
            error!(
                "watch authentication failed (401), check the operator's RBAC and service account token"
            );
            tokio::time::sleep(restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!("watch resource version expired (410), watch will restart");
            None
        }
        WatchErrorKind::Throttled => {
            let current = backoff_ms.load(Ordering::Relaxed);
            warn!("API server throttling the watch (429), backing off for {current}ms");
            tokio::time::sleep(Duration::from_millis(current)).await;
            backoff_ms.store(current.saturating_mul(2).min(max_backoff_ms), Ordering::Relaxed);
            None
        }
        WatchErrorKind::Other => {
            error!("controller stream error: {error}");
            tokio::time::sleep(restart_delay).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_error_classification() {
        assert_eq!(
            classify_watch_error("WatchFailed(Api(ErrorResponse { code: 404 }))"),
            WatchErrorKind::NotFound
        );
        assert_eq!(
            classify_watch_error("Api(ErrorResponse { reason: \"Unauthorized\", code: 401 })"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            classify_watch_error("too old resource version: 123 (456)"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            classify_watch_error("storage is (re)initializing"),
            WatchErrorKind::Throttled
        );
        assert_eq!(classify_watch_error("connection reset"), WatchErrorKind::Other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_doubles_backoff_up_to_max() {
        let backoff = AtomicU64::new(1_000);
        let restart = Duration::from_secs(5);
        assert!(handle_watch_stream_error("429 TooManyRequests", &backoff, 3_000, restart)
            .await
            .is_none());
        assert_eq!(backoff.load(Ordering::Relaxed), 2_000);
        handle_watch_stream_error("429 TooManyRequests", &backoff, 3_000, restart).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 3_000);
    }
}
