//! # Types
//!
//! Shared state handed to every reconcile pass.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::generator::Generator;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Requeue backoff for one Config after failed passes
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_seconds, max_seconds),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

pub struct Reconciler {
    pub client: Client,
    pub generator: Generator,
    pub config: ControllerConfig,
    // Keyed by Config name; only touched by the error policy and on success
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("generator", &self.generator)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(client: Client, generator: Generator, config: ControllerConfig) -> Self {
        Self {
            client,
            generator,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fresh backoff state sized from the controller configuration
    #[must_use]
    pub fn new_backoff_state(&self) -> BackoffState {
        BackoffState::new(
            self.config.error_backoff_min_secs,
            self.config.error_backoff_max_secs,
        )
    }

    /// Forget the failures recorded for `name`; returns whether there were any
    pub fn reset_backoff(&self, name: &str) -> bool {
        let Ok(mut states) = self.backoff_states.lock() else {
            return false;
        };
        states.get_mut(name).is_some_and(|state| {
            let had_errors = state.error_count > 0;
            state.reset();
            had_errors
        })
    }
}
