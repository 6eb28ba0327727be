//! # Errors
//!
//! Error type shared by the apply engine, the storage drivers and the
//! reconciler, with classifiers for the cases that change control flow.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The Config is invalid; retrying without a spec change cannot succeed
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A mutator failed; `object` names the kind and name it manages
    #[error("unable to apply {object}: {source}")]
    Apply {
        object: String,
        #[source]
        source: Box<Error>,
    },

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error("unable to remove storage: {0}")]
    StorageRemoval(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    #[must_use]
    pub fn apply(object: impl Into<String>, source: Error) -> Self {
        Self::Apply {
            object: object.into(),
            source: Box::new(source),
        }
    }

    /// HTTP status of the underlying API error, if any
    #[must_use]
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Self::Kube(kube::Error::Api(response)) => Some(response.code),
            Self::Apply { source, .. } => source.api_code(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// The object's resourceVersion moved underneath the write
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Configuration(_) => true,
            Self::Apply { source, .. } => source.is_configuration(),
            _ => false,
        }
    }

    /// Short machine-readable reason for status conditions
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Kube(_) => "APIError",
            Self::Apply { source, .. } => source.reason(),
            Self::Storage(_) | Self::StorageRemoval(_) => "StorageError",
            Self::Serialization(_) | Self::Other(_) => "Error",
        }
    }
}

/// Build an API error response the way the API server reports it
#[must_use]
pub fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}
