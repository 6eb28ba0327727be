use super::{merge_checksummed, MutatorContext, Target};
use crate::controller::apply::Mutator;
use crate::controller::object;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::DeleteParams;
use kube::Api;

/// Identity the registry pods run as
#[derive(Debug)]
pub struct ServiceAccountMutator {
    ctx: MutatorContext,
    target: Target<ServiceAccount>,
}

impl ServiceAccountMutator {
    #[must_use]
    pub fn new(ctx: MutatorContext) -> Self {
        let target = Target::new(
            Api::namespaced(ctx.client.clone(), ctx.namespace()),
            ctx.params.pod.service_account.clone(),
        );
        Self { ctx, target }
    }

    fn desired(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: self.ctx.namespaced_meta(self.target.name()),
            ..ServiceAccount::default()
        }
    }
}

#[async_trait]
impl Mutator for ServiceAccountMutator {
    type Object = ServiceAccount;

    fn kind(&self) -> &'static str {
        "ServiceAccount"
    }

    fn name(&self) -> String {
        object::describe(self.kind(), Some(self.ctx.namespace()), self.target.name())
    }

    fn owned(&self) -> bool {
        true
    }

    async fn get(&self) -> Result<ServiceAccount> {
        self.target.get().await
    }

    async fn create(&self) -> Result<ServiceAccount> {
        self.target.create(&object::with_checksum(self.desired())?).await
    }

    async fn update(&self, current: ServiceAccount) -> Result<Option<ServiceAccount>> {
        // Token and pull secrets are managed by the cluster
        merge_checksummed(current, &self.desired(), |_, _| {})
    }

    async fn replace(&self, updated: ServiceAccount) -> Result<ServiceAccount> {
        self.target.replace(&updated).await
    }

    async fn delete(&self, params: &DeleteParams) -> Result<()> {
        self.target.delete(params).await
    }
}
