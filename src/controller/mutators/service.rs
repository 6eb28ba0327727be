use super::{merge_checksummed, MutatorContext, Target};
use crate::constants::SERVING_CERT_ANNOTATION;
use crate::controller::apply::Mutator;
use crate::controller::object;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DeleteParams;
use kube::Api;
use std::collections::BTreeMap;

/// `<port>-tcp`, also the route's target port
#[must_use]
pub fn port_name(port: i32) -> String {
    format!("{port}-tcp")
}

/// Cluster-internal service in front of the registry pods
#[derive(Debug)]
pub struct ServiceMutator {
    ctx: MutatorContext,
    target: Target<Service>,
    tls: bool,
}

impl ServiceMutator {
    #[must_use]
    pub fn new(ctx: MutatorContext, tls: bool) -> Self {
        let target = Target::new(
            Api::namespaced(ctx.client.clone(), ctx.namespace()),
            ctx.params.service.name.clone(),
        );
        Self { ctx, target, tls }
    }

    fn desired(&self) -> Service {
        let params = &self.ctx.params;
        let mut metadata = self.ctx.namespaced_meta(self.target.name());
        metadata.labels = Some(params.deployment.labels.clone());
        if self.tls {
            metadata.annotations = Some(BTreeMap::from([(
                SERVING_CERT_ANNOTATION.to_string(),
                params.names.tls_secret.clone(),
            )]));
        }
        Service {
            metadata,
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(params.deployment.labels.clone()),
                ports: Some(vec![ServicePort {
                    name: Some(port_name(params.container.port)),
                    port: params.container.port,
                    protocol: Some("TCP".to_string()),
                    target_port: Some(IntOrString::Int(params.container.port)),
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }
}

#[async_trait]
impl Mutator for ServiceMutator {
    type Object = Service;

    fn kind(&self) -> &'static str {
        "Service"
    }

    fn name(&self) -> String {
        object::describe(self.kind(), Some(self.ctx.namespace()), self.target.name())
    }

    fn owned(&self) -> bool {
        true
    }

    async fn get(&self) -> Result<Service> {
        self.target.get().await
    }

    async fn create(&self) -> Result<Service> {
        self.target.create(&object::with_checksum(self.desired())?).await
    }

    async fn update(&self, current: Service) -> Result<Option<Service>> {
        let tls = self.tls;
        merge_checksummed(current, &self.desired(), |current, desired| {
            // clusterIP is allocated by the API server and immutable
            let desired_spec = desired.spec.clone().unwrap_or_default();
            let spec = current.spec.get_or_insert_with(ServiceSpec::default);
            spec.selector = desired_spec.selector;
            spec.type_ = desired_spec.type_;
            spec.ports = desired_spec.ports;
            if !tls {
                if let Some(annotations) = current.metadata.annotations.as_mut() {
                    annotations.remove(SERVING_CERT_ANNOTATION);
                }
            }
        })
    }

    async fn replace(&self, updated: Service) -> Result<Service> {
        self.target.replace(&updated).await
    }

    async fn delete(&self, params: &DeleteParams) -> Result<()> {
        self.target.delete(params).await
    }
}
