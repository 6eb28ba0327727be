//! # Registry Pod Template
//!
//! Builds the pod template of the registry deployment from the Config, the
//! storage driver's contribution and the checksums of the objects the pods
//! read at start-up. Pure; every cluster read happens in the deployment
//! mutator.

use super::secret::HTTP_SECRET_KEY;
use super::StorageContribution;
use crate::config::Parameters;
use crate::constants::{CERTIFICATES_CHECKSUM_ANNOTATION, SECRET_CHECKSUM_ANNOTATION};
use crate::crd::{ConfigSpec, RequestLimit};
use crate::error::{Error, Result};
use crate::storage::{env, secret_env};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction, PodSecurityContext,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

const TLS_VOLUME: &str = "registry-tls";
const TLS_MOUNT_PATH: &str = "/etc/secrets";
const CERTIFICATES_VOLUME: &str = "registry-certificates";
const CERTIFICATES_MOUNT_PATH: &str = "/etc/pki/ca-trust/source/anchors";

/// Cluster state the template depends on besides the Config
#[derive(Debug, Clone, Default)]
pub struct TemplateInputs {
    pub storage: StorageContribution,
    /// Checksum of the private configuration secret data
    pub secret_checksum: Option<String>,
    /// Checksum of the trusted certificates config map data
    pub certificates_checksum: Option<String>,
    /// First supplemental group of the namespace, used as fsGroup
    pub fs_group: Option<i64>,
}

/// Registry log level for the Config's `logging` verbosity
#[must_use]
pub fn log_level(logging: i64) -> &'static str {
    match logging {
        i64::MIN..=0 => "error",
        1 => "warn",
        2 | 3 => "info",
        _ => "debug",
    }
}

fn throttling_env(kind: &str, limit: &RequestLimit) -> Result<Vec<EnvVar>> {
    if limit.max_running < 0 || limit.max_in_queue < 0 {
        return Err(Error::configuration(format!(
            "requests.{}: maxRunning and maxInQueue must not be negative",
            kind.to_lowercase()
        )));
    }
    let prefix = format!("REGISTRY_OPENSHIFT_REQUESTS_{kind}");
    let mut vars = vec![
        env(&format!("{prefix}_MAXRUNNING"), limit.max_running.to_string()),
        env(&format!("{prefix}_MAXINQUEUE"), limit.max_in_queue.to_string()),
    ];
    if !limit.max_wait_in_queue.is_empty() {
        vars.push(env(
            &format!("{prefix}_MAXWAITINQUEUE"),
            limit.max_wait_in_queue.clone(),
        ));
    }
    Ok(vars)
}

/// Checks on the Config fields the template consumes, run before anything
/// is written
pub fn validate(spec: &ConfigSpec) -> Result<()> {
    request_env(spec).map(|_| ())
}

fn request_env(spec: &ConfigSpec) -> Result<Vec<EnvVar>> {
    let mut vars = Vec::new();
    if let Some(requests) = &spec.requests {
        if let Some(read) = &requests.read {
            vars.extend(throttling_env("READ", read)?);
        }
        if let Some(write) = &requests.write {
            vars.extend(throttling_env("WRITE", write)?);
        }
    }
    Ok(vars)
}

fn container_env(params: &Parameters, spec: &ConfigSpec, inputs: &TemplateInputs) -> Result<Vec<EnvVar>> {
    let mut vars = vec![
        env("REGISTRY_HTTP_ADDR", format!(":{}", params.container.port)),
        env("REGISTRY_HTTP_NET", "tcp"),
        secret_env(
            HTTP_SECRET_KEY,
            &params.names.private_configuration,
            HTTP_SECRET_KEY,
        ),
        env("REGISTRY_LOG_LEVEL", log_level(spec.logging)),
        env("REGISTRY_OPENSHIFT_QUOTA_ENABLED", "true"),
        env("REGISTRY_STORAGE_CACHE_BLOBDESCRIPTOR", "inmemory"),
        env("REGISTRY_STORAGE_DELETE_ENABLED", "true"),
        env(
            "REGISTRY_OPENSHIFT_SERVER_ADDR",
            params.internal_hostname(),
        ),
    ];
    vars.extend(inputs.storage.env.iter().cloned());
    vars.extend(request_env(spec)?);
    if spec.tls {
        vars.push(env(
            "REGISTRY_HTTP_TLS_CERTIFICATE",
            format!("{TLS_MOUNT_PATH}/tls.crt"),
        ));
        vars.push(env("REGISTRY_HTTP_TLS_KEY", format!("{TLS_MOUNT_PATH}/tls.key")));
    }
    Ok(vars)
}

fn volumes(params: &Parameters, spec: &ConfigSpec, inputs: &TemplateInputs) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut pairs = inputs.storage.volumes.clone();
    if spec.tls {
        pairs.push((
            Volume {
                name: TLS_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(params.names.tls_secret.clone()),
                    ..SecretVolumeSource::default()
                }),
                ..Volume::default()
            },
            VolumeMount {
                name: TLS_VOLUME.to_string(),
                mount_path: TLS_MOUNT_PATH.to_string(),
                read_only: Some(true),
                ..VolumeMount::default()
            },
        ));
    }
    pairs.push((
        Volume {
            name: CERTIFICATES_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: params.names.certificates.clone(),
                optional: Some(true),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        },
        VolumeMount {
            name: CERTIFICATES_VOLUME.to_string(),
            mount_path: CERTIFICATES_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        },
    ));
    pairs.into_iter().unzip()
}

fn probe(params: &Parameters, tls: bool, initial_delay: Option<i32>) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(params.healthz.route.clone()),
            port: IntOrString::Int(params.container.port),
            scheme: Some(if tls { "HTTPS" } else { "HTTP" }.to_string()),
            ..HTTPGetAction::default()
        }),
        timeout_seconds: Some(params.healthz.timeout_seconds),
        initial_delay_seconds: initial_delay,
        ..Probe::default()
    }
}

fn resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("100m".to_string())),
            ("memory".to_string(), Quantity("256Mi".to_string())),
        ])),
        ..ResourceRequirements::default()
    }
}

/// Pod template for the registry deployment
pub fn build(params: &Parameters, spec: &ConfigSpec, inputs: &TemplateInputs) -> Result<PodTemplateSpec> {
    let (volumes, volume_mounts) = volumes(params, spec, inputs);

    let mut annotations = BTreeMap::new();
    if let Some(checksum) = &inputs.secret_checksum {
        annotations.insert(SECRET_CHECKSUM_ANNOTATION.to_string(), checksum.clone());
    }
    if let Some(checksum) = &inputs.certificates_checksum {
        annotations.insert(CERTIFICATES_CHECKSUM_ANNOTATION.to_string(), checksum.clone());
    }

    let image = spec
        .image
        .clone()
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| params.default_image.clone());

    let container = Container {
        name: params.container.name.clone(),
        image: Some(image),
        ports: Some(vec![ContainerPort {
            container_port: params.container.port,
            protocol: Some("TCP".to_string()),
            ..ContainerPort::default()
        }]),
        env: Some(container_env(params, spec, inputs)?),
        volume_mounts: Some(volume_mounts),
        liveness_probe: Some(probe(
            params,
            spec.tls,
            Some(params.healthz.liveness_initial_delay_seconds),
        )),
        readiness_probe: Some(probe(params, spec.tls, None)),
        resources: Some(resources()),
        ..Container::default()
    };

    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(params.deployment.labels.clone()),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..ObjectMeta::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            volumes: Some(volumes),
            service_account_name: Some(params.pod.service_account.clone()),
            node_selector: (!spec.node_selector.is_empty()).then(|| spec.node_selector.clone()),
            security_context: inputs.fs_group.map(|group| PodSecurityContext {
                fs_group: Some(group),
                ..PodSecurityContext::default()
            }),
            priority_class_name: Some("system-cluster-critical".to_string()),
            ..PodSpec::default()
        }),
    })
}
