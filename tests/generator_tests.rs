//! # Generator Tests
//!
//! Full apply and remove passes against an in-memory API server, asserting
//! on the requests the operator sends.

mod common;

use common::api_server::{Call, FakeApiServer};
use image_registry_operator::config::{ControllerConfig, Parameters};
use image_registry_operator::controller::generator::Generator;
use image_registry_operator::crd::Config;
use serde_json::{json, Value};
use std::sync::Arc;

const CONFIGS: &str = "/apis/imageregistry.operator.openshift.io/v1/configs";
const CLUSTER_OPERATORS: &str = "/apis/config.openshift.io/v1/clusteroperators";
const CLUSTER_OPERATOR_STATUS: &str =
    "/apis/config.openshift.io/v1/clusteroperators/image-registry/status";
const DEPLOYMENTS: &str = "/apis/apps/v1/namespaces/openshift-image-registry/deployments";
const ROUTES: &str = "/apis/route.openshift.io/v1/namespaces/openshift-image-registry/routes";
const CONFIG_MAPS: &str = "/api/v1/namespaces/openshift-image-registry/configmaps";

const EMPTY_DIR: &str = "httpSecret: fixed\nstorage:\n  filesystem:\n    emptyDir: {}\n";

fn registry_config(spec_yaml: &str) -> Config {
    let mut cr = common::config(spec_yaml);
    cr.metadata.uid = Some("config-uid".to_string());
    cr.metadata.generation = Some(1);
    cr
}

async fn setup(cr: &Config) -> (FakeApiServer, Generator) {
    let api = FakeApiServer::start().await;
    api.seed(CONFIGS, cr);
    let config = ControllerConfig::default();
    let generator = Generator::new(api.client(), Arc::new(Parameters::new(&config)), &config);
    (api, generator)
}

/// The Config as the server holds it now, status included
fn stored_config(api: &FakeApiServer) -> Config {
    let object = api.object(CONFIGS, "cluster").expect("config stored");
    serde_json::from_value(object).expect("config parses")
}

fn condition(api: &FakeApiServer, r#type: &str) -> Value {
    let operator = api
        .object(CLUSTER_OPERATORS, "image-registry")
        .expect("cluster operator exists");
    operator["status"]["conditions"]
        .as_array()
        .and_then(|c| c.iter().find(|c| c["type"] == r#type).cloned())
        .expect("condition present")
}

fn owned_route(name: &str) -> Value {
    json!({
        "apiVersion": "route.openshift.io/v1",
        "kind": "Route",
        "metadata": {
            "name": name,
            "namespace": "openshift-image-registry",
            "annotations": { "imageregistry.openshift.io": "true" },
            "ownerReferences": [{
                "apiVersion": "imageregistry.operator.openshift.io/v1",
                "kind": "Config",
                "name": "cluster",
                "uid": "config-uid",
                "controller": true,
            }],
        },
        "spec": { "to": { "kind": "Service", "name": "image-registry" } },
    })
}

fn position(calls: &[Call], method: &str, path: &str) -> Option<usize> {
    calls.iter().rposition(|c| c.method == method && c.path == path)
}

#[tokio::test]
async fn test_second_apply_writes_nothing() {
    let cr = registry_config(EMPTY_DIR);
    let (api, generator) = setup(&cr).await;

    let first = generator.apply(&cr).await.expect("first apply");
    assert!(first.writes() > 0);

    api.clear_calls();
    let second = generator
        .apply(&stored_config(&api))
        .await
        .expect("second apply");
    assert_eq!(second.writes(), 0);
    assert_eq!(api.writes(), Vec::<Call>::new());
}

#[tokio::test]
async fn test_objects_are_created_in_dependency_order() {
    let cr = registry_config(&format!("defaultRoute: true\n{EMPTY_DIR}"));
    let (api, generator) = setup(&cr).await;

    generator.apply(&cr).await.expect("apply");

    let calls = api.calls();
    let created: Vec<&str> = calls
        .iter()
        .filter(|c| c.method == "POST")
        .filter_map(|c| c.path.rsplit('/').next())
        .collect();
    assert_eq!(
        created,
        vec![
            "clusterroles",
            "clusterrolebindings",
            "serviceaccounts",
            "configmaps",
            "configmaps",
            "secrets",
            "services",
            "deployments",
            "routes",
            "clusteroperators",
        ]
    );

    let status_write = position(&calls, "PATCH", CLUSTER_OPERATOR_STATUS).expect("status written");
    let last_object_write = calls
        .iter()
        .rposition(|c| c.method == "POST" && !c.path.starts_with(CLUSTER_OPERATORS))
        .expect("objects created");
    assert!(status_write > last_object_write);
    assert_eq!(condition(&api, "Degraded")["status"], "False");
}

#[tokio::test]
async fn test_storage_misconfiguration_creates_no_objects() {
    let specs = [
        "storage: {}\n",
        "storage:\n  filesystem:\n    emptyDir: {}\n  s3:\n    bucket: registry\n",
    ];
    for spec in specs {
        let cr = registry_config(spec);
        let (api, generator) = setup(&cr).await;

        let err = generator.apply(&cr).await.expect_err("misconfigured storage");
        assert!(err.is_configuration(), "{spec}: {err}");

        let writes = api.writes();
        assert!(
            writes.iter().all(|c| c.path.starts_with(CLUSTER_OPERATORS)),
            "{spec}: unexpected writes {writes:?}"
        );
        let degraded = condition(&api, "Degraded");
        assert_eq!(degraded["status"], "True");
        assert_eq!(degraded["reason"], "ConfigurationError");
    }
}

#[tokio::test]
async fn test_failed_mutator_still_reports_degraded() {
    let cr = registry_config(EMPTY_DIR);
    let (api, generator) = setup(&cr).await;
    api.fail("POST", DEPLOYMENTS, 500, 1);

    let err = generator.apply(&cr).await.expect_err("deployment create fails");
    assert_eq!(err.api_code(), Some(500));

    let calls = api.calls();
    let failed_create = position(&calls, "POST", DEPLOYMENTS).expect("deployment attempted");
    let status_write = position(&calls, "PATCH", CLUSTER_OPERATOR_STATUS).expect("status written");
    assert!(status_write > failed_create);
    assert_eq!(condition(&api, "Degraded")["status"], "True");

    // Nothing after the failing mutator ran, the snapshot included
    let later_writes: Vec<&Call> = calls[failed_create + 1..]
        .iter()
        .filter(|c| c.is_write())
        .collect();
    assert!(
        later_writes.iter().all(|c| c.path.starts_with(CLUSTER_OPERATORS)),
        "unexpected writes {later_writes:?}"
    );
    assert!(api.object(CONFIG_MAPS, "image-registry-operator-state").is_none());
}

#[tokio::test]
async fn test_storage_identity_survives_a_failed_pass() {
    let cr = registry_config(EMPTY_DIR);
    let (api, generator) = setup(&cr).await;
    api.fail("POST", DEPLOYMENTS, 500, 1);

    generator.apply(&cr).await.expect_err("deployment create fails");
    let recorded = stored_config(&api);
    let status = recorded.status.clone().expect("status recorded");
    assert!(status.storage.filesystem.is_some());

    api.clear_calls();
    generator.apply(&recorded).await.expect("retry succeeds");
    assert!(
        !api.writes().iter().any(|c| c.path == format!("{CONFIGS}/cluster/status")),
        "storage identity is not rewritten"
    );
    assert!(api.object(CONFIG_MAPS, "image-registry-operator-state").is_some());
}

#[tokio::test]
async fn test_obsolete_route_is_the_only_one_deleted() {
    let cr = registry_config(&format!("routes:\n  - name: a\n  - name: c\n{EMPTY_DIR}"));
    let (api, generator) = setup(&cr).await;
    for name in ["a", "b", "c"] {
        api.seed(ROUTES, &owned_route(name));
    }
    let mut foreign = owned_route("d");
    foreign["metadata"]["annotations"] = json!({});
    api.seed(ROUTES, &foreign);
    api.fail("DELETE", &format!("{ROUTES}/b"), 409, 1);

    let report = generator.apply(&cr).await.expect("apply");
    assert_eq!(report.removed_routes, vec!["b".to_string()]);

    let deletes: Vec<String> = api
        .calls()
        .into_iter()
        .filter(|c| c.method == "DELETE")
        .map(|c| c.path)
        .collect();
    assert_eq!(deletes, vec![format!("{ROUTES}/b"), format!("{ROUTES}/b")]);
    assert!(api.object(ROUTES, "b").is_none());
    for kept in ["a", "c", "d"] {
        assert!(api.object(ROUTES, kept).is_some(), "route {kept} kept");
    }
}

#[tokio::test]
async fn test_remove_deletes_owned_objects_only() {
    let cr = registry_config(&format!("defaultRoute: true\n{EMPTY_DIR}"));
    let (api, generator) = setup(&cr).await;
    generator.apply(&cr).await.expect("apply");

    api.clear_calls();
    generator.remove(&stored_config(&api)).await.expect("remove");

    let writes = api.writes();
    assert!(writes.iter().all(|c| c.method == "DELETE"), "{writes:?}");
    assert!(!writes.iter().any(|c| c.path.starts_with(CLUSTER_OPERATORS)));
    assert!(api.object(DEPLOYMENTS, "image-registry").is_none());
    assert!(api.object(ROUTES, "default-route").is_none());
    assert!(api.object(CONFIG_MAPS, "image-registry-operator-state").is_none());
    assert!(api.object(CLUSTER_OPERATORS, "image-registry").is_some());

    // Reverse apply order: the route goes before the deployment
    let route = position(&writes, "DELETE", &format!("{ROUTES}/default-route")).expect("route");
    let deployment =
        position(&writes, "DELETE", &format!("{DEPLOYMENTS}/image-registry")).expect("deployment");
    assert!(route < deployment);
}
