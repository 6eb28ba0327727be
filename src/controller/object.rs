//! # Object helpers
//!
//! Checksums, metadata merging and diffing for managed objects.

use crate::constants::CHECKSUM_ANNOTATION;
use crate::crd::Config;
use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// `sha256:<hex>` of the JSON serialization of `obj`
pub fn checksum<T: Serialize>(obj: &T) -> Result<String> {
    let data = serde_json::to_vec(obj)?;
    Ok(format!("sha256:{:x}", Sha256::digest(&data)))
}

/// Whether `meta` already carries `digest` in the checksum annotation
#[must_use]
pub fn has_checksum(meta: &ObjectMeta, digest: &str) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(CHECKSUM_ANNOTATION))
        .is_some_and(|current| current == digest)
}

pub fn set_checksum(meta: &mut ObjectMeta, digest: &str) {
    meta.annotations
        .get_or_insert_with(Default::default)
        .insert(CHECKSUM_ANNOTATION.to_string(), digest.to_string());
}

/// Stamp `obj` with the checksum of its current content
///
/// The checksum is computed before the annotation is added, so the same
/// desired object always produces the same value.
pub fn with_checksum<K>(mut obj: K) -> Result<K>
where
    K: Resource + Serialize,
{
    let digest = checksum(&obj)?;
    set_checksum(obj.meta_mut(), &digest);
    Ok(obj)
}

/// Merge the fields the operator owns from `required` into `existing`.
///
/// Name and namespace are taken from `required`. Labels and annotations are
/// merged key by key so entries written by other actors survive. Owner
/// references with the same uid are replaced, others are kept.
pub fn merge_object_meta(existing: &mut ObjectMeta, required: &ObjectMeta) {
    existing.name.clone_from(&required.name);
    existing.namespace.clone_from(&required.namespace);

    if let Some(labels) = &required.labels {
        let target = existing.labels.get_or_insert_with(Default::default);
        for (k, v) in labels {
            target.insert(k.clone(), v.clone());
        }
    }
    if let Some(annotations) = &required.annotations {
        let target = existing.annotations.get_or_insert_with(Default::default);
        for (k, v) in annotations {
            target.insert(k.clone(), v.clone());
        }
    }
    if let Some(owners) = &required.owner_references {
        let target = existing.owner_references.get_or_insert_with(Vec::new);
        for owner in owners {
            match target.iter_mut().find(|o| o.uid == owner.uid) {
                Some(slot) => slot.clone_from(owner),
                None => target.push(owner.clone()),
            }
        }
    }
}

/// Controller owner reference pointing at the Config
pub fn owner_reference(cr: &Config) -> Result<OwnerReference> {
    cr.controller_owner_ref(&()).ok_or_else(|| {
        Error::configuration("Config has no uid yet; cannot set owner references")
    })
}

/// Whether `meta` names `owner_uid` as its controller
#[must_use]
pub fn is_controlled_by(meta: &ObjectMeta, owner_uid: &str) -> bool {
    meta.owner_references
        .as_ref()
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.controller == Some(true) && r.uid == owner_uid)
        })
}

/// JSON paths that differ between two serialized objects, for logs
pub fn changed_paths<T: Serialize>(before: &T, after: &T) -> Result<Vec<String>> {
    let before = serde_json::to_value(before)?;
    let after = serde_json::to_value(after)?;
    let mut paths = Vec::new();
    diff_values("", &before, &after, &mut paths);
    Ok(paths)
}

fn diff_values(path: &str, before: &Value, after: &Value, out: &mut Vec<String>) {
    match (before, after) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, av) in a {
                let child = format!("{path}/{key}");
                match b.get(key) {
                    Some(bv) => diff_values(&child, av, bv, out),
                    None => out.push(child),
                }
            }
            for key in b.keys().filter(|k| !a.contains_key(*k)) {
                out.push(format!("{path}/{key}"));
            }
        }
        (a, b) if a != b => out.push(if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        }),
        _ => {}
    }
}

/// `Kind, Namespace=<ns>, Name=<name>` used in logs and errors
#[must_use]
pub fn describe(kind: &str, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{kind}, Namespace={ns}, Name={name}"),
        None => format!("{kind}, Name={name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceAccount;
    use std::collections::BTreeMap;

    fn service_account(labels: &[(&str, &str)]) -> ServiceAccount {
        ServiceAccount {
            metadata: ObjectMeta {
                name: Some("registry".to_string()),
                namespace: Some("openshift-image-registry".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            ..ServiceAccount::default()
        }
    }

    #[test]
    fn test_checksum_is_stable_and_prefixed() {
        let a = checksum(&service_account(&[("a", "1")])).expect("checksum");
        let b = checksum(&service_account(&[("a", "1")])).expect("checksum");
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let a = checksum(&service_account(&[("a", "1")])).expect("checksum");
        let b = checksum(&service_account(&[("a", "2")])).expect("checksum");
        assert_ne!(a, b);
    }

    #[test]
    fn test_with_checksum_round_trips_through_has_checksum() {
        let desired = service_account(&[("a", "1")]);
        let digest = checksum(&desired).expect("checksum");
        let stamped = with_checksum(desired).expect("stamp");
        assert!(has_checksum(&stamped.metadata, &digest));
        assert!(!has_checksum(&stamped.metadata, "sha256:other"));
    }

    #[test]
    fn test_merge_keeps_foreign_labels_and_annotations() {
        let mut existing = service_account(&[("foreign", "x"), ("docker-registry", "old")]);
        existing.metadata.annotations = Some(BTreeMap::from([(
            "openshift.io/internal-registry-pull-secret-ref".to_string(),
            "registry-dockercfg".to_string(),
        )]));
        let required = service_account(&[("docker-registry", "default")]);

        merge_object_meta(&mut existing.metadata, &required.metadata);

        let labels = existing.metadata.labels.expect("labels");
        assert_eq!(labels.get("foreign").map(String::as_str), Some("x"));
        assert_eq!(labels.get("docker-registry").map(String::as_str), Some("default"));
        assert!(existing
            .metadata
            .annotations
            .expect("annotations")
            .contains_key("openshift.io/internal-registry-pull-secret-ref"));
    }

    #[test]
    fn test_merge_replaces_owner_with_same_uid() {
        let owner = |kind: &str| OwnerReference {
            api_version: "imageregistry.operator.openshift.io/v1".to_string(),
            kind: kind.to_string(),
            name: "cluster".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        let mut existing = ObjectMeta {
            owner_references: Some(vec![owner("Old")]),
            ..ObjectMeta::default()
        };
        let required = ObjectMeta {
            owner_references: Some(vec![owner("Config")]),
            ..ObjectMeta::default()
        };
        merge_object_meta(&mut existing, &required);
        assert!(is_controlled_by(&existing, "uid-1"));
        assert!(!is_controlled_by(&existing, "uid-2"));
        let refs = existing.owner_references.expect("owners");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "Config");
    }

    #[test]
    fn test_changed_paths() {
        let before = service_account(&[("a", "1"), ("b", "2")]);
        let after = service_account(&[("a", "1"), ("b", "3"), ("c", "4")]);
        let paths = changed_paths(&before, &after).expect("diff");
        assert_eq!(paths, vec!["/metadata/labels/b", "/metadata/labels/c"]);
    }
}
