//! # ClusterOperator
//!
//! Client-side definition of `config.openshift.io/v1` ClusterOperator. The
//! type is owned by the cluster; the operator only reads it and writes its
//! status.

use crate::crd::Condition;
use serde::{Deserialize, Serialize};

#[derive(
    kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "ClusterOperator",
    group = "config.openshift.io",
    version = "v1",
    status = "crate::crd::ClusterOperatorStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOperatorSpec {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOperatorStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub related_objects: Vec<RelatedObject>,
    #[serde(default)]
    pub versions: Vec<OperandVersion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelatedObject {
    pub group: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct OperandVersion {
    pub name: String,
    pub version: String,
}
