//! # Config Status
//!
//! Computes and writes the Config status after a pass. The status is only
//! written when something observable changed.
//!
//! The storage identity is also recorded on its own as soon as storage is
//! synced, ahead of the rest of the pass. A pass that fails after creating a
//! bucket still leaves its name and ownership behind for the next pass.

use crate::config::Parameters;
use crate::controller::conditions::{self, DeploymentCounters};
use crate::controller::generator::ApplyReport;
use crate::crd::{Config, ConfigStatus, StorageSpec};
use crate::error::{Error, Result};
use crate::storage::ConfigState;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

/// How the pass the status is written for ended
#[derive(Debug)]
pub enum PassOutcome<'a> {
    Applied(&'a ApplyReport),
    Failed(&'a Error),
    Removed,
}

/// Status the Config should carry, `None` when the current one already matches
#[must_use]
pub fn desired_status(
    cr: &Config,
    outcome: &PassOutcome<'_>,
    params: &Parameters,
    deployment: Option<&DeploymentCounters>,
    now: &str,
) -> Option<ConfigStatus> {
    let current = cr.status.clone().unwrap_or_default();
    let mut status = current.clone();

    let axes = match outcome {
        PassOutcome::Removed => conditions::removed(),
        PassOutcome::Applied(_) => vec![
            conditions::available(deployment),
            conditions::progressing(deployment),
            conditions::degraded(None),
        ],
        PassOutcome::Failed(err) => {
            let message = err.to_string();
            vec![
                conditions::available(deployment),
                conditions::progressing(deployment),
                conditions::degraded(Some((err.reason(), &message))),
            ]
        }
    };
    conditions::set_conditions(&mut status.conditions, axes, now);

    match outcome {
        PassOutcome::Applied(report) => {
            status.storage = report.storage.storage.clone();
            status.storage_managed = report.storage.storage_managed;
            status.internal_registry_hostname = Some(params.internal_hostname());
        }
        PassOutcome::Removed => {
            status.storage = StorageSpec::default();
            status.storage_managed = false;
            status.internal_registry_hostname = None;
        }
        // A failed pass keeps the last applied storage identity
        PassOutcome::Failed(_) => {}
    }
    status.observed_generation = cr.metadata.generation;

    (status != current).then_some(status)
}

/// Status carrying a freshly synced storage identity
#[must_use]
pub fn with_storage(current: Option<&ConfigStatus>, state: &ConfigState) -> ConfigStatus {
    ConfigStatus {
        storage: state.storage.clone(),
        storage_managed: state.storage_managed,
        ..current.cloned().unwrap_or_default()
    }
}

/// JSON merge patch turning `before` into `after`; `None` when they match.
/// Members missing from `after` are sent as `null` so the server drops them.
fn merge_diff(before: &Value, after: &Value) -> Option<Value> {
    match (before, after) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for (key, value) in after {
                let diff = match before.get(key) {
                    Some(old) => merge_diff(old, value),
                    None => Some(value.clone()),
                };
                if let Some(diff) = diff {
                    patch.insert(key.clone(), diff);
                }
            }
            for key in before.keys().filter(|k| !after.contains_key(*k)) {
                patch.insert(key.clone(), Value::Null);
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        (before, after) if before == after => None,
        (_, after) => Some(after.clone()),
    }
}

/// Status patch from `current` to `desired`
pub fn status_patch(current: &ConfigStatus, desired: &ConfigStatus) -> Result<Option<Value>> {
    let before = serde_json::to_value(current)?;
    let after = serde_json::to_value(desired)?;
    Ok(merge_diff(&before, &after).map(|status| json!({ "status": status })))
}

async fn write_status(
    client: Client,
    cr: &Config,
    current: &ConfigStatus,
    desired: &ConfigStatus,
) -> Result<bool> {
    let Some(patch) = status_patch(current, desired)? else {
        return Ok(false);
    };
    let api: Api<Config> = Api::all(client);
    api.patch_status(&cr.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(true)
}

/// Record the synced storage identity on the Config status ahead of the
/// rest of the pass
pub async fn record_storage(client: Client, cr: &Config, state: &ConfigState) -> Result<bool> {
    let current = cr.status.clone().unwrap_or_default();
    let desired = with_storage(Some(&current), state);
    let written = write_status(client, cr, &current, &desired).await?;
    if written {
        info!(
            storage_managed = state.storage_managed,
            "storage identity recorded on config status"
        );
    }
    Ok(written)
}

/// Write the Config status for `outcome` if it changed
pub async fn update_status(
    client: Client,
    cr: &Config,
    outcome: &PassOutcome<'_>,
    params: &Parameters,
) -> Result<bool> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &params.namespace);
    let deployment = deployments
        .get_opt(&params.deployment.name)
        .await?
        .as_ref()
        .map(DeploymentCounters::from_deployment);

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let Some(status) = desired_status(cr, outcome, params, deployment.as_ref(), &now) else {
        debug!("config status unchanged");
        return Ok(false);
    };

    let current = cr.status.clone().unwrap_or_default();
    let written = write_status(client, cr, &current, &status).await?;
    if written {
        debug!("config status updated");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::crd::{condition_types, ConditionStatus, ConfigSpec, GcsStorage, S3Storage};

    const T0: &str = "2026-04-01T08:00:00Z";
    const T1: &str = "2026-04-01T08:10:00Z";

    fn config() -> Config {
        let spec: ConfigSpec =
            serde_json::from_str(r#"{"storage":{"s3":{"bucket":"b","region":"us-east-1"}}}"#)
                .expect("spec should parse");
        let mut cr = Config::new("cluster", spec);
        cr.metadata.generation = Some(3);
        cr
    }

    fn ready() -> DeploymentCounters {
        DeploymentCounters {
            desired: 1,
            replicas: 1,
            updated: 1,
            available: 1,
            generation: 2,
            observed_generation: 2,
        }
    }

    fn report() -> ApplyReport {
        ApplyReport {
            storage: ConfigState {
                storage: StorageSpec {
                    s3: Some(S3Storage {
                        bucket: "b".to_string(),
                        region: "us-east-1".to_string(),
                        ..S3Storage::default()
                    }),
                    ..StorageSpec::default()
                },
                storage_managed: true,
            },
            ..ApplyReport::default()
        }
    }

    #[test]
    fn test_applied_pass_records_storage_and_hostname() {
        let params = Parameters::new(&ControllerConfig::default());
        let report = report();
        let status = desired_status(
            &config(),
            &PassOutcome::Applied(&report),
            &params,
            Some(&ready()),
            T0,
        )
        .expect("first write");
        assert!(status.storage_managed);
        assert_eq!(status.storage.s3.as_ref().map(|s| s.bucket.as_str()), Some("b"));
        assert_eq!(
            status.internal_registry_hostname.as_deref(),
            Some("image-registry.openshift-image-registry.svc:5000")
        );
        assert_eq!(status.observed_generation, Some(3));
    }

    #[test]
    fn test_same_outcome_does_not_rewrite() {
        let params = Parameters::new(&ControllerConfig::default());
        let report = report();
        let mut cr = config();
        cr.status = desired_status(&cr, &PassOutcome::Applied(&report), &params, Some(&ready()), T0);
        let again = desired_status(&cr, &PassOutcome::Applied(&report), &params, Some(&ready()), T1);
        assert!(again.is_none());
    }

    #[test]
    fn test_configuration_error_reason() {
        let params = Parameters::new(&ControllerConfig::default());
        let err = Error::configuration("exactly one storage backend must be configured");
        let status = desired_status(&config(), &PassOutcome::Failed(&err), &params, None, T0)
            .expect("write");
        let degraded =
            conditions::find(&status.conditions, condition_types::DEGRADED).expect("degraded");
        assert_eq!(degraded.status, ConditionStatus::True);
        assert_eq!(degraded.reason.as_deref(), Some("ConfigurationError"));
    }

    #[test]
    fn test_removed_clears_storage_identity() {
        let params = Parameters::new(&ControllerConfig::default());
        let report = report();
        let mut cr = config();
        cr.status = desired_status(&cr, &PassOutcome::Applied(&report), &params, Some(&ready()), T0);
        let status =
            desired_status(&cr, &PassOutcome::Removed, &params, None, T1).expect("write");
        assert!(!status.storage_managed);
        assert!(status.storage.is_empty());
        assert_eq!(status.internal_registry_hostname, None);
    }

    #[test]
    fn test_failed_pass_keeps_recorded_storage() {
        let params = Parameters::new(&ControllerConfig::default());
        let recorded = report().storage;
        let mut cr = config();
        cr.status = Some(with_storage(None, &recorded));

        let err = Error::configuration("route public: secret missing does not exist");
        let status = desired_status(&cr, &PassOutcome::Failed(&err), &params, None, T0)
            .expect("degraded is new");
        assert_eq!(status.storage, recorded.storage);
        assert!(status.storage_managed);
    }

    #[test]
    fn test_patch_nulls_dropped_backend_and_hostname() {
        let params = Parameters::new(&ControllerConfig::default());
        let report = report();
        let mut cr = config();
        cr.status = desired_status(&cr, &PassOutcome::Applied(&report), &params, Some(&ready()), T0);
        let current = cr.status.clone().expect("status");

        let gcs = ConfigState {
            storage: StorageSpec {
                gcs: Some(GcsStorage {
                    bucket: "g".to_string(),
                    ..GcsStorage::default()
                }),
                ..StorageSpec::default()
            },
            storage_managed: true,
        };
        let mut desired = with_storage(Some(&current), &gcs);
        desired.internal_registry_hostname = None;

        let patch = status_patch(&current, &desired)
            .expect("patch")
            .expect("status changed");
        assert_eq!(patch["status"]["storage"]["s3"], Value::Null);
        assert_eq!(patch["status"]["storage"]["gcs"]["bucket"], "g");
        assert_eq!(patch["status"]["internalRegistryHostname"], Value::Null);
        assert!(patch["status"].get("conditions").is_none());
        assert!(patch["status"].get("storageManaged").is_none());
    }

    #[test]
    fn test_unchanged_status_has_no_patch() {
        let status = with_storage(None, &report().storage);
        assert!(status_patch(&status, &status).expect("patch").is_none());
    }
}
