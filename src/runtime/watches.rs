//! # Watches
//!
//! Kinds the controller watches besides the Config, and how their events map
//! back to the Config that owns them.

use crate::config::Parameters;
use crate::constants::{CONFIG_RESOURCE_NAME, OPERATOR_GROUP};
use crate::crd::{ClusterOperator, Config, Route};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Api, Client};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedKind {
    ClusterRole,
    ClusterRoleBinding,
    ServiceAccount,
    ConfigMap,
    Secret,
    Service,
    Deployment,
    Route,
    ClusterOperator,
}

impl ManagedKind {
    pub const ALL: [Self; 9] = [
        Self::ClusterRole,
        Self::ClusterRoleBinding,
        Self::ServiceAccount,
        Self::ConfigMap,
        Self::Secret,
        Self::Service,
        Self::Deployment,
        Self::Route,
        Self::ClusterOperator,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::ServiceAccount => "ServiceAccount",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::Service => "Service",
            Self::Deployment => "Deployment",
            Self::Route => "Route",
            Self::ClusterOperator => "ClusterOperator",
        }
    }

    #[must_use]
    pub fn namespaced(self) -> bool {
        !matches!(
            self,
            Self::ClusterRole | Self::ClusterRoleBinding | Self::ClusterOperator
        )
    }

    fn watch(self, controller: Controller<Config>, client: &Client, params: &Parameters) -> Controller<Config> {
        let namespace = params.namespace.as_str();
        let scoped = watcher::Config::default();
        let by_name = |name: &str| watcher::Config::default().fields(&format!("metadata.name={name}"));

        match self {
            Self::ClusterRole => controller.watches(
                Api::<ClusterRole>::all(client.clone()),
                by_name(&params.rbac.cluster_role),
                |o| config_for(&o.metadata),
            ),
            Self::ClusterRoleBinding => controller.watches(
                Api::<ClusterRoleBinding>::all(client.clone()),
                by_name(&params.rbac.cluster_role_binding),
                |o| config_for(&o.metadata),
            ),
            Self::ServiceAccount => controller.watches(
                Api::<ServiceAccount>::namespaced(client.clone(), namespace),
                scoped,
                |o| config_for(&o.metadata),
            ),
            Self::ConfigMap => controller.watches(
                Api::<ConfigMap>::namespaced(client.clone(), namespace),
                scoped,
                |o| config_for(&o.metadata),
            ),
            Self::Secret => {
                // The user credentials secret is not owned but still feeds the pass
                let user_secret = params.names.user_configuration.clone();
                controller.watches(
                    Api::<Secret>::namespaced(client.clone(), namespace),
                    scoped,
                    move |o| {
                        config_for(&o.metadata).or_else(|| {
                            (o.metadata.name.as_deref() == Some(user_secret.as_str()))
                                .then(cluster_config)
                        })
                    },
                )
            }
            Self::Service => controller.watches(
                Api::<Service>::namespaced(client.clone(), namespace),
                scoped,
                |o| config_for(&o.metadata),
            ),
            Self::Deployment => controller.watches(
                Api::<Deployment>::namespaced(client.clone(), namespace),
                scoped,
                |o| config_for(&o.metadata),
            ),
            Self::Route => controller.watches(
                Api::<Route>::namespaced(client.clone(), namespace),
                scoped,
                |o| config_for(&o.metadata),
            ),
            Self::ClusterOperator => controller.watches(
                Api::<ClusterOperator>::all(client.clone()),
                by_name(&params.operator_name),
                |_| Some(cluster_config()),
            ),
        }
    }
}

fn cluster_config() -> ObjectRef<Config> {
    ObjectRef::new(CONFIG_RESOURCE_NAME)
}

/// The Config named by the object's controller owner reference
#[must_use]
pub fn config_for(meta: &ObjectMeta) -> Option<ObjectRef<Config>> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|o| o.controller == Some(true))
        .filter(|o| o.kind == "Config" && o.api_version.starts_with(&format!("{OPERATOR_GROUP}/")))
        .map(|o| ObjectRef::new(&o.name))
}

/// Register a watch for every managed kind
#[must_use]
pub fn watch_managed(
    mut controller: Controller<Config>,
    client: &Client,
    params: &Parameters,
) -> Controller<Config> {
    for kind in ManagedKind::ALL {
        controller = kind.watch(controller, client, params);
        debug!(kind = kind.as_str(), namespaced = kind.namespaced(), "watching managed kind");
    }
    controller
}
