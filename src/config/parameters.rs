//! # Parameters
//!
//! Fixed names and topology of the objects that make up a registry
//! deployment. Built once at start-up from [`ControllerConfig`] and shared
//! by every mutator.

use crate::config::ControllerConfig;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Parameters {
    pub namespace: String,
    pub operator_name: String,
    pub default_image: String,
    pub deployment: DeploymentParameters,
    pub container: ContainerParameters,
    pub healthz: HealthzParameters,
    pub service: ServiceParameters,
    pub pod: PodParameters,
    pub rbac: RbacParameters,
    pub names: ObjectNames,
}

#[derive(Debug, Clone)]
pub struct DeploymentParameters {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ContainerParameters {
    pub name: String,
    pub port: i32,
}

#[derive(Debug, Clone)]
pub struct HealthzParameters {
    pub route: String,
    pub timeout_seconds: i32,
    pub liveness_initial_delay_seconds: i32,
}

#[derive(Debug, Clone)]
pub struct ServiceParameters {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct PodParameters {
    pub service_account: String,
}

#[derive(Debug, Clone)]
pub struct RbacParameters {
    pub cluster_role: String,
    pub cluster_role_binding: String,
}

/// Names of the secrets, config maps and routes the operator reads or writes
#[derive(Debug, Clone)]
pub struct ObjectNames {
    /// Operator-owned secret with storage credentials and the HTTP secret
    pub private_configuration: String,
    /// User-provided credentials copied into `private_configuration`
    pub user_configuration: String,
    /// Serving certificate issued by the service CA
    pub tls_secret: String,
    /// Config map the service CA injects its bundle into
    pub service_ca: String,
    /// Trusted CA bundle mounted into the registry pods
    pub certificates: String,
    /// Snapshot of the last applied storage configuration
    pub config_state: String,
    /// Name of the route created for `defaultRoute: true`
    pub default_route: String,
}

impl Parameters {
    #[must_use]
    pub fn new(config: &ControllerConfig) -> Self {
        let name = "image-registry".to_string();
        Self {
            namespace: config.namespace.clone(),
            operator_name: config.operator_name.clone(),
            default_image: config.registry_image.clone(),
            deployment: DeploymentParameters {
                name: name.clone(),
                labels: BTreeMap::from([("docker-registry".to_string(), "default".to_string())]),
            },
            container: ContainerParameters {
                name: "registry".to_string(),
                port: 5000,
            },
            healthz: HealthzParameters {
                route: "/healthz".to_string(),
                timeout_seconds: 5,
                liveness_initial_delay_seconds: 10,
            },
            service: ServiceParameters { name },
            pod: PodParameters {
                service_account: "registry".to_string(),
            },
            rbac: RbacParameters {
                cluster_role: "system:registry".to_string(),
                cluster_role_binding: "registry-registry-role".to_string(),
            },
            names: ObjectNames {
                private_configuration: "image-registry-private-configuration".to_string(),
                user_configuration: "image-registry-private-configuration-user".to_string(),
                tls_secret: "image-registry-tls".to_string(),
                service_ca: "serviceca".to_string(),
                certificates: "image-registry-certificates".to_string(),
                config_state: "image-registry-operator-state".to_string(),
                default_route: "default-route".to_string(),
            },
        }
    }

    /// In-cluster hostname of the registry service, `<service>.<namespace>.svc:<port>`
    #[must_use]
    pub fn internal_hostname(&self) -> String {
        format!(
            "{}.{}.svc:{}",
            self.service.name, self.namespace, self.container.port
        )
    }

    /// Hostnames clients use to reach the registry from inside the cluster
    #[must_use]
    pub fn internal_hostnames(&self) -> Vec<String> {
        vec![
            self.internal_hostname(),
            format!(
                "{}.{}.svc.cluster.local:{}",
                self.service.name, self.namespace, self.container.port
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_hostnames() {
        let mut config = ControllerConfig::default();
        config.namespace = "registry-ns".to_string();
        let params = Parameters::new(&config);
        assert_eq!(params.internal_hostname(), "image-registry.registry-ns.svc:5000");
        assert_eq!(
            params.internal_hostnames()[1],
            "image-registry.registry-ns.svc.cluster.local:5000"
        );
    }

    #[test]
    fn test_registry_labels() {
        let params = Parameters::new(&ControllerConfig::default());
        assert_eq!(
            params.deployment.labels.get("docker-registry").map(String::as_str),
            Some("default")
        );
    }
}
