//! # Conditions
//!
//! Replace-on-type condition updates and the health axes derived from the
//! registry deployment.

use crate::crd::{condition_types, Condition, ConditionStatus};
use k8s_openapi::api::apps::v1::Deployment;

/// Insert or replace the condition with the same type.
///
/// `lastTransitionTime` moves only when the status value changes. Returns
/// whether anything observable changed, so re-asserting an identical
/// condition never causes a write.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition, now: &str) -> bool {
    match conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        Some(existing) => {
            if existing.status == new.status {
                if existing.reason == new.reason && existing.message == new.message {
                    return false;
                }
                new.last_transition_time.clone_from(&existing.last_transition_time);
            } else {
                new.last_transition_time = Some(now.to_string());
            }
            *existing = new;
            true
        }
        None => {
            new.last_transition_time = Some(now.to_string());
            conditions.push(new);
            true
        }
    }
}

/// Apply several conditions, reporting whether any of them changed
pub fn set_conditions(conditions: &mut Vec<Condition>, new: Vec<Condition>, now: &str) -> bool {
    new.into_iter()
        .fold(false, |changed, c| set_condition(conditions, c, now) || changed)
}

#[must_use]
pub fn find<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

/// Deployment counters the health axes are computed from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeploymentCounters {
    pub desired: i32,
    pub replicas: i32,
    pub updated: i32,
    pub available: i32,
    pub generation: i64,
    pub observed_generation: i64,
}

impl DeploymentCounters {
    #[must_use]
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let desired = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let status = deployment.status.clone().unwrap_or_default();
        Self {
            desired,
            replicas: status.replicas.unwrap_or(0),
            updated: status.updated_replicas.unwrap_or(0),
            available: status.available_replicas.unwrap_or(0),
            generation: deployment.metadata.generation.unwrap_or(0),
            observed_generation: status.observed_generation.unwrap_or(0),
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available > 0
    }

    /// Rolled out completely: every counter matches the desired replicas and
    /// the controller has seen the latest generation
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.updated == self.desired
            && self.replicas == self.desired
            && self.available == self.desired
            && self.observed_generation >= self.generation
    }
}

/// Available axis for the registry deployment, `None` when it does not exist
#[must_use]
pub fn available(deployment: Option<&DeploymentCounters>) -> Condition {
    match deployment {
        None => Condition::new(
            condition_types::AVAILABLE,
            ConditionStatus::False,
            "DeploymentNotFound",
            "The deployment does not exist",
        ),
        Some(d) if d.is_available() => Condition::new(
            condition_types::AVAILABLE,
            ConditionStatus::True,
            "MinimumAvailability",
            "The registry has minimum availability",
        ),
        Some(_) => Condition::new(
            condition_types::AVAILABLE,
            ConditionStatus::False,
            "NoReplicasAvailable",
            "The deployment does not have available replicas",
        ),
    }
}

#[must_use]
pub fn progressing(deployment: Option<&DeploymentCounters>) -> Condition {
    match deployment {
        None => Condition::new(
            condition_types::PROGRESSING,
            ConditionStatus::True,
            "DeploymentNotFound",
            "The deployment does not exist",
        ),
        Some(d) if d.is_complete() => Condition::new(
            condition_types::PROGRESSING,
            ConditionStatus::False,
            "Ready",
            "The deployment has successfully progressed",
        ),
        Some(_) => Condition::new(
            condition_types::PROGRESSING,
            ConditionStatus::True,
            "DeploymentProgressing",
            "The deployment is progressing",
        ),
    }
}

/// Degraded axis; `failure` is the reason and message of the failed pass
#[must_use]
pub fn degraded(failure: Option<(&str, &str)>) -> Condition {
    match failure {
        Some((reason, message)) => Condition::new(
            condition_types::DEGRADED,
            ConditionStatus::True,
            reason,
            message,
        ),
        None => Condition::new(
            condition_types::DEGRADED,
            ConditionStatus::False,
            "AsExpected",
            "The registry is ready",
        ),
    }
}

/// Axes reported while the registry is intentionally removed
#[must_use]
pub fn removed() -> Vec<Condition> {
    let message = "The registry is removed";
    vec![
        Condition::new(
            condition_types::AVAILABLE,
            ConditionStatus::False,
            "Removed",
            message,
        ),
        Condition::new(
            condition_types::PROGRESSING,
            ConditionStatus::False,
            "Removed",
            message,
        ),
        Condition::new(
            condition_types::DEGRADED,
            ConditionStatus::False,
            "Removed",
            message,
        ),
    ]
}
