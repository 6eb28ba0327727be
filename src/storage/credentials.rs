//! # Credentials
//!
//! Storage credentials supplied by the cluster administrator in the user
//! configuration secret. Values are wiped from memory when dropped.

use crate::error::Result;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::debug;
use zeroize::Zeroizing;

#[derive(Clone, Default)]
pub struct Credentials {
    values: BTreeMap<String, Zeroizing<String>>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Credentials {
    /// Read the user configuration secret; a missing secret yields no credentials
    pub async fn load(client: Client, namespace: &str, name: &str) -> Result<Self> {
        let secrets: Api<Secret> = Api::namespaced(client, namespace);
        match secrets.get(name).await {
            Ok(secret) => Ok(Self::from_secret(&secret)),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                debug!(secret = name, "no user storage credentials, using ambient identity");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[must_use]
    pub fn from_secret(secret: &Secret) -> Self {
        let mut values = BTreeMap::new();
        for (key, value) in secret.data.iter().flatten() {
            if let Ok(text) = String::from_utf8(value.0.clone()) {
                values.insert(key.clone(), Zeroizing::new(text));
            }
        }
        for (key, value) in secret.string_data.iter().flatten() {
            values.insert(key.clone(), Zeroizing::new(value.clone()));
        }
        Self { values }
    }

    #[must_use]
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), Zeroizing::new(v.to_string())))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Both values, when both are present
    #[must_use]
    pub fn pair(&self, first: &str, second: &str) -> Option<(&str, &str)> {
        Some((self.get(first)?, self.get(second)?))
    }

    /// Copy the present keys into the private configuration secret data
    pub(crate) fn copy_into(&self, keys: &[&str], out: &mut BTreeMap<String, String>) {
        for key in keys {
            if let Some(value) = self.get(key) {
                out.insert((*key).to_string(), value.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_from_secret_reads_data_and_string_data() {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                "REGISTRY_STORAGE_S3_ACCESSKEY".to_string(),
                ByteString(b"AKIA".to_vec()),
            )])),
            string_data: Some(BTreeMap::from([(
                "REGISTRY_STORAGE_S3_SECRETKEY".to_string(),
                "shh".to_string(),
            )])),
            ..Secret::default()
        };
        let creds = Credentials::from_secret(&secret);
        assert_eq!(
            creds.pair("REGISTRY_STORAGE_S3_ACCESSKEY", "REGISTRY_STORAGE_S3_SECRETKEY"),
            Some(("AKIA", "shh"))
        );
    }

    #[test]
    fn test_empty_values_are_absent() {
        let creds = Credentials::from_pairs([("KEY", "")]);
        assert_eq!(creds.get("KEY"), None);
    }

    #[test]
    fn test_debug_hides_values() {
        let creds = Credentials::from_pairs([("KEY", "value")]);
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("KEY"));
        assert!(!rendered.contains("value"));
    }
}
