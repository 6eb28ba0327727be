//! Cluster role granting the registry access to image streams and quotas,
//! and its binding to the registry service account.

use super::{merge_checksummed, MutatorContext, Target};
use crate::controller::apply::Mutator;
use crate::controller::object;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use kube::api::DeleteParams;
use kube::Api;

fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(owned(groups)),
        resources: Some(owned(resources)),
        verbs: owned(verbs),
        ..PolicyRule::default()
    }
}

/// Permissions the registry needs to serve and prune image streams
#[must_use]
pub fn registry_rules() -> Vec<PolicyRule> {
    vec![
        rule(&[""], &["limitranges", "resourcequotas"], &["list"]),
        rule(
            &["", "image.openshift.io"],
            &["imagestreamimages", "imagestreams/secrets", "imagestreamtags"],
            &["get"],
        ),
        rule(
            &["", "image.openshift.io"],
            &["imagestreams"],
            &["get", "list", "watch"],
        ),
        rule(&["", "image.openshift.io"], &["images"], &["get", "update"]),
        rule(&["", "image.openshift.io"], &["imagestreams/layers"], &["get"]),
        rule(
            &["", "image.openshift.io"],
            &["imagestreammappings"],
            &["create"],
        ),
        rule(&["", "image.openshift.io"], &["imagestreamtags"], &["delete"]),
    ]
}

#[derive(Debug)]
pub struct ClusterRoleMutator {
    ctx: MutatorContext,
    target: Target<ClusterRole>,
}

impl ClusterRoleMutator {
    #[must_use]
    pub fn new(ctx: MutatorContext) -> Self {
        let target = Target::new(
            Api::all(ctx.client.clone()),
            ctx.params.rbac.cluster_role.clone(),
        );
        Self { ctx, target }
    }

    fn desired(&self) -> ClusterRole {
        ClusterRole {
            metadata: self.ctx.cluster_meta(self.target.name()),
            rules: Some(registry_rules()),
            ..ClusterRole::default()
        }
    }
}

#[async_trait]
impl Mutator for ClusterRoleMutator {
    type Object = ClusterRole;

    fn kind(&self) -> &'static str {
        "ClusterRole"
    }

    fn name(&self) -> String {
        object::describe(self.kind(), None, self.target.name())
    }

    fn owned(&self) -> bool {
        true
    }

    async fn get(&self) -> Result<ClusterRole> {
        self.target.get().await
    }

    async fn create(&self) -> Result<ClusterRole> {
        self.target.create(&object::with_checksum(self.desired())?).await
    }

    async fn update(&self, current: ClusterRole) -> Result<Option<ClusterRole>> {
        merge_checksummed(current, &self.desired(), |current, desired| {
            current.rules.clone_from(&desired.rules);
            current.aggregation_rule = None;
        })
    }

    async fn replace(&self, updated: ClusterRole) -> Result<ClusterRole> {
        self.target.replace(&updated).await
    }

    async fn delete(&self, params: &DeleteParams) -> Result<()> {
        self.target.delete(params).await
    }
}

#[derive(Debug)]
pub struct ClusterRoleBindingMutator {
    ctx: MutatorContext,
    target: Target<ClusterRoleBinding>,
}

impl ClusterRoleBindingMutator {
    #[must_use]
    pub fn new(ctx: MutatorContext) -> Self {
        let target = Target::new(
            Api::all(ctx.client.clone()),
            ctx.params.rbac.cluster_role_binding.clone(),
        );
        Self { ctx, target }
    }

    fn desired(&self) -> ClusterRoleBinding {
        let params = &self.ctx.params;
        ClusterRoleBinding {
            metadata: self.ctx.cluster_meta(self.target.name()),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: params.rbac.cluster_role.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: params.pod.service_account.clone(),
                namespace: Some(params.namespace.clone()),
                api_group: None,
            }]),
        }
    }
}

#[async_trait]
impl Mutator for ClusterRoleBindingMutator {
    type Object = ClusterRoleBinding;

    fn kind(&self) -> &'static str {
        "ClusterRoleBinding"
    }

    fn name(&self) -> String {
        object::describe(self.kind(), None, self.target.name())
    }

    fn owned(&self) -> bool {
        true
    }

    async fn get(&self) -> Result<ClusterRoleBinding> {
        self.target.get().await
    }

    async fn create(&self) -> Result<ClusterRoleBinding> {
        self.target.create(&object::with_checksum(self.desired())?).await
    }

    async fn update(&self, current: ClusterRoleBinding) -> Result<Option<ClusterRoleBinding>> {
        // roleRef is immutable; a binding pointing elsewhere fails the replace
        merge_checksummed(current, &self.desired(), |current, desired| {
            current.role_ref = desired.role_ref.clone();
            current.subjects.clone_from(&desired.subjects);
        })
    }

    async fn replace(&self, updated: ClusterRoleBinding) -> Result<ClusterRoleBinding> {
        self.target.replace(&updated).await
    }

    async fn delete(&self, params: &DeleteParams) -> Result<()> {
        self.target.delete(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_can_create_image_stream_mappings() {
        let rules = registry_rules();
        assert!(rules.iter().any(|r| {
            r.resources
                .as_ref()
                .is_some_and(|res| res.iter().any(|x| x == "imagestreammappings"))
                && r.verbs.iter().any(|v| v == "create")
        }));
    }

    #[test]
    fn test_quota_rules_are_read_only() {
        let rules = registry_rules();
        let quota = rules
            .iter()
            .find(|r| {
                r.resources
                    .as_ref()
                    .is_some_and(|res| res.iter().any(|x| x == "resourcequotas"))
            })
            .expect("quota rule");
        assert_eq!(quota.verbs, vec!["list".to_string()]);
    }
}
