//! # CRD Validation Tests
//!
//! Sample Config resources deserialize into the expected spec, and the
//! generated CRD keeps its group, scope and status subresource.

mod common;

use image_registry_operator::crd::{Config, ManagementState, StorageType};
use image_registry_operator::storage::select_backend;
use kube::core::CustomResourceExt;

#[test]
fn test_full_config_deserializes() {
    let yaml = r#"
apiVersion: imageregistry.operator.openshift.io/v1
kind: Config
metadata:
  name: cluster
spec:
  managementState: Managed
  replicas: 2
  defaultRoute: true
  httpSecret: 0123456789abcdef
  logging: 4
  routes:
    - name: public
      hostname: registry.apps.example.com
      secretName: public-route-tls
  requests:
    read:
      maxRunning: 10
      maxInQueue: 20
      maxWaitInQueue: 30s
  nodeSelector:
    node-role.kubernetes.io/infra: ""
  storage:
    s3:
      bucket: registry-bucket
      region: eu-west-1
      regionEndpoint: https://s3.example.com
      encrypt: true
"#;

    let config: Config = serde_yaml::from_str(yaml).expect("Should deserialize a full Config");
    let spec = &config.spec;
    assert_eq!(spec.management_state, ManagementState::Managed);
    assert_eq!(spec.replicas, 2);
    assert!(spec.default_route);
    assert_eq!(spec.routes[0].secret_name.as_deref(), Some("public-route-tls"));
    let read = spec
        .requests
        .as_ref()
        .and_then(|r| r.read.as_ref())
        .expect("read limits");
    assert_eq!(read.max_in_queue, 20);
    assert_eq!(read.max_wait_in_queue, "30s");
    let s3 = spec.storage.s3.as_ref().expect("s3 storage");
    assert_eq!(s3.region_endpoint, "https://s3.example.com");
    assert!(s3.encrypt);
    assert_eq!(select_backend(&spec.storage).expect("one backend"), StorageType::S3);
}

#[test]
fn test_defaults_for_minimal_config() {
    let config = common::config("storage:\n  filesystem:\n    emptyDir: {}\n");
    assert_eq!(config.spec.management_state, ManagementState::Managed);
    assert_eq!(config.spec.replicas, 1);
    assert!(config.spec.tls);
    assert_eq!(config.spec.logging, 2);
    assert!(config.spec.http_secret.is_empty());
    assert!(config.spec.routes.is_empty());
}

#[test]
fn test_each_backend_is_selected() {
    let cases = [
        ("filesystem:\n    persistentVolumeClaim:\n      claimName: registry", StorageType::Filesystem),
        ("gcs:\n    bucket: b\n    projectID: p", StorageType::Gcs),
        ("azure:\n    accountName: account", StorageType::Azure),
        ("swift:\n    authURL: https://keystone.example.com/v3", StorageType::Swift),
    ];
    for (storage, expected) in cases {
        let config = common::config(&format!("storage:\n  {storage}\n"));
        assert_eq!(
            select_backend(&config.spec.storage).expect("one backend"),
            expected,
            "{storage}"
        );
    }
}

#[test]
fn test_zero_or_two_backends_are_configuration_errors() {
    let none = common::config("managementState: Managed\n");
    let err = select_backend(&none.spec.storage).expect_err("no backend");
    assert!(err.is_configuration());

    let two = common::config("storage:\n  s3:\n    bucket: b\n  gcs:\n    bucket: b\n");
    let err = select_backend(&two.spec.storage).expect_err("two backends");
    assert!(err.is_configuration());
    assert!(err.to_string().contains("s3"));
}

#[test]
fn test_unknown_management_state_is_rejected() {
    let result: Result<Config, _> = serde_yaml::from_str(
        "apiVersion: imageregistry.operator.openshift.io/v1\nkind: Config\nmetadata:\n  name: cluster\nspec:\n  managementState: Paused\n",
    );
    assert!(result.is_err());
}

#[test]
fn test_generated_crd_shape() {
    let crd = Config::crd();
    assert_eq!(crd.spec.group, "imageregistry.operator.openshift.io");
    assert_eq!(crd.spec.scope, "Cluster");
    assert_eq!(crd.spec.names.kind, "Config");
    let version = &crd.spec.versions[0];
    assert_eq!(version.name, "v1");
    assert!(version
        .subresources
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some());

    let yaml = serde_yaml::to_string(&crd).expect("CRD serializes");
    assert!(yaml.contains("internalRegistryHostname"));
}
