//! # Watch Loop
//!
//! Runs the Config controller and restarts it when the watch stream ends.

use crate::config::Parameters;
use crate::constants::{WATCH_BACKOFF_MAX_MS, WATCH_BACKOFF_START_MS, WATCH_RESTART_DELAY_SECS};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::crd::Config;
use crate::error::Error;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::runtime::watches::watch_managed;
use crate::server::ServerState;
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::{controller::Action, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    params: Arc<Parameters>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let backoff_ms = Arc::new(AtomicU64::new(WATCH_BACKOFF_START_MS));
    let restart_delay = Duration::from_secs(WATCH_RESTART_DELAY_SECS);

    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal, waiting for in-flight passes to finish");
        shutdown_state.is_ready.store(false, Ordering::Relaxed);
    });

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            break;
        }

        info!("starting controller watch");
        let configs: Api<Config> = Api::all(client.clone());
        let controller = Controller::new(configs, watcher::Config::default().any_semantic());
        let stream_backoff = Arc::clone(&backoff_ms);

        watch_managed(controller, &client, &params)
            .shutdown_on_signal()
            .run(reconcile_traced, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(move |event| {
                let backoff = Arc::clone(&stream_backoff);
                async move {
                    match &event {
                        Ok((obj, _)) => {
                            backoff.store(WATCH_BACKOFF_START_MS, Ordering::Relaxed);
                            debug!(config = %obj.name, "watch.event.reconciled");
                            Some(event)
                        }
                        Err(e) => handle_watch_stream_error(
                            &format!("{e:?}"),
                            &backoff,
                            WATCH_BACKOFF_MAX_MS,
                            restart_delay,
                        )
                        .await
                        .map(|()| event),
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            break;
        }
        warn!("controller watch stream ended, restarting in {WATCH_RESTART_DELAY_SECS}s");
        tokio::time::sleep(restart_delay).await;
    }

    info!("controller stopped gracefully");
    Ok(())
}

async fn reconcile_traced(obj: Arc<Config>, ctx: Arc<Reconciler>) -> Result<Action, Error> {
    let span = tracing::span!(
        tracing::Level::INFO,
        "reconcile",
        resource.name = %obj.name_any(),
        resource.generation = obj.metadata.generation.unwrap_or(0),
        resource.management_state = %obj.spec.management_state,
    );
    reconcile(obj, ctx).instrument(span).await
}
