use super::service::port_name;
use super::{merge_checksummed, MutatorContext, Target};
use crate::constants::ROUTE_OWNER_ANNOTATION;
use crate::controller::apply::Mutator;
use crate::controller::object;
use crate::crd::{RegistryRoute, Route, RoutePort, RouteSpec, RouteTargetReference, TlsConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DeleteParams;
use kube::Api;
use std::collections::BTreeMap;

/// Keys read from a route's `secretName`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteCertificates {
    pub certificate: Option<String>,
    pub key: Option<String>,
    pub ca_certificate: Option<String>,
}

impl RouteCertificates {
    fn from_secret(secret: &Secret) -> Self {
        let value = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .and_then(|v| String::from_utf8(v.0.clone()).ok())
        };
        Self {
            certificate: value("tls.crt"),
            key: value("tls.key"),
            ca_certificate: value("ca.crt"),
        }
    }
}

/// TLS block for a registry route; the registry itself terminates TLS when
/// `tls` is set, so the router re-encrypts
#[must_use]
pub fn route_tls(registry_tls: bool, certificates: Option<RouteCertificates>) -> TlsConfig {
    let certificates = certificates.unwrap_or_default();
    TlsConfig {
        termination: if registry_tls { "reencrypt" } else { "edge" }.to_string(),
        insecure_edge_termination_policy: None,
        certificate: certificates.certificate,
        key: certificates.key,
        ca_certificate: certificates.ca_certificate,
        destination_ca_certificate: None,
    }
}

/// One externally exposed route to the registry service
#[derive(Debug)]
pub struct RouteMutator {
    ctx: MutatorContext,
    target: Target<Route>,
    route: RegistryRoute,
    tls: bool,
}

impl RouteMutator {
    #[must_use]
    pub fn new(ctx: MutatorContext, route: RegistryRoute, tls: bool) -> Self {
        let target = Target::new(
            Api::namespaced(ctx.client.clone(), ctx.namespace()),
            route.name.clone(),
        );
        Self {
            ctx,
            target,
            route,
            tls,
        }
    }

    async fn certificates(&self) -> Result<Option<RouteCertificates>> {
        let Some(secret_name) = self.route.secret_name.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let secrets: Api<Secret> = Api::namespaced(self.ctx.client.clone(), self.ctx.namespace());
        match secrets.get_opt(secret_name).await? {
            Some(secret) => Ok(Some(RouteCertificates::from_secret(&secret))),
            None => Err(Error::configuration(format!(
                "route {}: secret {secret_name} does not exist",
                self.route.name
            ))),
        }
    }

    fn build(&self, certificates: Option<RouteCertificates>) -> Route {
        let mut metadata = self.ctx.namespaced_meta(self.target.name());
        metadata.annotations = Some(BTreeMap::from([(
            ROUTE_OWNER_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
        Route {
            metadata,
            spec: RouteSpec {
                host: self.route.hostname.clone().filter(|h| !h.is_empty()),
                to: RouteTargetReference {
                    kind: "Service".to_string(),
                    name: self.ctx.params.service.name.clone(),
                    weight: Some(100),
                },
                port: Some(RoutePort {
                    target_port: port_name(self.ctx.params.container.port),
                }),
                tls: Some(route_tls(self.tls, certificates)),
            },
        }
    }

    async fn desired(&self) -> Result<Route> {
        Ok(self.build(self.certificates().await?))
    }
}

#[async_trait]
impl Mutator for RouteMutator {
    type Object = Route;

    fn kind(&self) -> &'static str {
        "Route"
    }

    fn name(&self) -> String {
        object::describe(self.kind(), Some(self.ctx.namespace()), self.target.name())
    }

    fn owned(&self) -> bool {
        true
    }

    async fn get(&self) -> Result<Route> {
        self.target.get().await
    }

    async fn create(&self) -> Result<Route> {
        self.target.create(&object::with_checksum(self.desired().await?)?).await
    }

    async fn update(&self, current: Route) -> Result<Option<Route>> {
        merge_checksummed(current, &self.desired().await?, |current, desired| {
            // Router-assigned host survives when none is requested
            let host = desired.spec.host.clone().or_else(|| current.spec.host.clone());
            current.spec = desired.spec.clone();
            current.spec.host = host;
        })
    }

    async fn replace(&self, updated: Route) -> Result<Route> {
        self.target.replace(&updated).await
    }

    async fn delete(&self, params: &DeleteParams) -> Result<()> {
        self.target.delete(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::mutators::test_context;

    fn route(name: &str, hostname: Option<&str>) -> RegistryRoute {
        RegistryRoute {
            name: name.to_string(),
            hostname: hostname.map(str::to_string),
            secret_name: None,
        }
    }

    #[test]
    fn test_termination_follows_registry_tls() {
        assert_eq!(route_tls(true, None).termination, "reencrypt");
        assert_eq!(route_tls(false, None).termination, "edge");
    }

    #[test]
    fn test_certificates_are_read_from_secret_keys() {
        use k8s_openapi::ByteString;
        let secret = Secret {
            data: Some(BTreeMap::from([
                ("tls.crt".to_string(), ByteString(b"CERT".to_vec())),
                ("tls.key".to_string(), ByteString(b"KEY".to_vec())),
            ])),
            ..Secret::default()
        };
        let tls = route_tls(true, Some(RouteCertificates::from_secret(&secret)));
        assert_eq!(tls.certificate.as_deref(), Some("CERT"));
        assert_eq!(tls.key.as_deref(), Some("KEY"));
        assert_eq!(tls.ca_certificate, None);
    }

    #[tokio::test]
    async fn test_route_targets_registry_service_and_is_marked() {
        let mutator = RouteMutator::new(
            test_context(),
            route("public", Some("registry.apps.example.com")),
            true,
        );
        let desired = mutator.build(None);
        assert_eq!(desired.spec.to.kind, "Service");
        assert_eq!(desired.spec.to.name, "image-registry");
        assert_eq!(
            desired.spec.port.as_ref().map(|p| p.target_port.as_str()),
            Some("5000-tcp")
        );
        assert_eq!(
            desired
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(ROUTE_OWNER_ANNOTATION))
                .map(String::as_str),
            Some("true")
        );
        assert_eq!(desired.spec.host.as_deref(), Some("registry.apps.example.com"));
    }

    #[tokio::test]
    async fn test_generated_host_is_kept() {
        let mutator = RouteMutator::new(test_context(), route("default-route", None), false);
        let mut current = mutator.build(None);
        current.spec.host =
            Some("default-route-openshift-image-registry.apps.example.com".to_string());
        current.spec.tls = None;

        let updated = mutator
            .update(current)
            .await
            .expect("update")
            .expect("tls changed");
        assert_eq!(
            updated.spec.host.as_deref(),
            Some("default-route-openshift-image-registry.apps.example.com")
        );
        assert_eq!(updated.spec.tls.map(|t| t.termination).as_deref(), Some("edge"));
    }
}
