//! # Route reconciliation
//!
//! Desired route set and garbage collection of routes the operator created
//! but the Config no longer asks for.

use crate::config::Parameters;
use crate::constants::ROUTE_OWNER_ANNOTATION;
use crate::controller::backoff::{retry_on_conflict, ConflictBackoff};
use crate::controller::object;
use crate::crd::{ConfigSpec, RegistryRoute, Route};
use crate::error::{Error, Result};
use crate::observability::metrics;
use kube::api::{DeleteParams, ListParams, PropagationPolicy};
use kube::{Api, Client};
use std::collections::BTreeSet;
use tracing::info;

/// Routes the Config asks for: the default route first, then the declared ones
#[must_use]
pub fn desired_routes(spec: &ConfigSpec, params: &Parameters) -> Vec<RegistryRoute> {
    let mut routes = Vec::with_capacity(spec.routes.len() + 1);
    if spec.default_route {
        routes.push(RegistryRoute {
            name: params.names.default_route.clone(),
            hostname: None,
            secret_name: None,
        });
    }
    routes.extend(spec.routes.iter().cloned());
    routes
}

/// Created by this operator for the Config with `owner_uid`
#[must_use]
pub fn is_created_by_operator(route: &Route, owner_uid: &str) -> bool {
    let marked = route
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ROUTE_OWNER_ANNOTATION))
        .is_some_and(|v| v == "true");
    marked && object::is_controlled_by(&route.metadata, owner_uid)
}

/// Names of the operator's routes that are not in `desired`
#[must_use]
pub fn obsolete_routes(routes: &[Route], desired: &BTreeSet<String>, owner_uid: &str) -> Vec<String> {
    routes
        .iter()
        .filter(|r| is_created_by_operator(r, owner_uid))
        .filter_map(|r| r.metadata.name.clone())
        .filter(|name| !desired.contains(name))
        .collect()
}

/// Delete the operator's routes missing from `desired`; returns their names
pub async fn remove_obsolete_routes(
    client: Client,
    namespace: &str,
    desired: &BTreeSet<String>,
    owner_uid: &str,
    backoff: &ConflictBackoff,
) -> Result<Vec<String>> {
    let api: Api<Route> = Api::namespaced(client, namespace);
    let routes = api.list(&ListParams::default()).await?;
    let obsolete = obsolete_routes(&routes.items, desired, owner_uid);

    let params = DeleteParams {
        grace_period_seconds: Some(0),
        propagation_policy: Some(PropagationPolicy::Foreground),
        ..DeleteParams::default()
    };
    let (api, params) = (&api, &params);
    for name in &obsolete {
        let deleted = retry_on_conflict(backoff, "Route", move || async move {
            api.delete(name, params).await.map(|_| ()).map_err(Error::from)
        })
        .await;
        match deleted {
            Ok(()) => {
                metrics::record_object_operation("Route", "delete");
                info!(route = %name, namespace, "obsolete route deleted");
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                return Err(Error::apply(
                    object::describe("Route", Some(namespace), name),
                    err,
                ))
            }
        }
    }
    Ok(obsolete)
}
