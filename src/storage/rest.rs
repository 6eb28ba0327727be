//! Shared plumbing for the backends driven over plain HTTP (GCS, Azure Blob,
//! Swift).

use super::RemoveStorageError;
use crate::error::{Error, Result};
use crate::observability::metrics;
use anyhow::{anyhow, Context};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
        .map_err(Error::Storage)
}

/// Drain a failed response into an error description
pub(crate) async fn describe(response: Response) -> (StatusCode, String) {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    (status, body)
}

pub(crate) fn storage_error(backend: &str, operation: &str, status: StatusCode, body: &str) -> Error {
    metrics::increment_storage_operation_errors(backend);
    Error::Storage(anyhow!(
        "{backend}: unable to {operation}: HTTP {}: {}",
        status.as_u16(),
        body.trim()
    ))
}

/// Authentication and authorization failures are terminal, everything else
/// (throttling, conflicts, server errors) is retried
pub(crate) fn removal_error(
    backend: &str,
    operation: &str,
    status: StatusCode,
    body: &str,
) -> RemoveStorageError {
    metrics::increment_storage_operation_errors(backend);
    let err = anyhow!(
        "{backend}: unable to {operation}: HTTP {}: {}",
        status.as_u16(),
        body.trim()
    );
    if is_terminal(status) {
        RemoveStorageError::Terminal(err)
    } else {
        RemoveStorageError::Retriable(err)
    }
}

/// Transport failures during teardown are always worth another attempt
pub(crate) fn transport_error(backend: &str, operation: &str, err: &reqwest::Error) -> RemoveStorageError {
    metrics::increment_storage_operation_errors(backend);
    RemoveStorageError::Retriable(anyhow!("{backend}: unable to {operation}: {err}"))
}

pub(crate) fn is_terminal(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_failures_are_terminal() {
        assert!(matches!(
            removal_error("gcs", "delete bucket", StatusCode::FORBIDDEN, "denied"),
            RemoveStorageError::Terminal(_)
        ));
        assert!(matches!(
            removal_error("gcs", "delete bucket", StatusCode::UNAUTHORIZED, ""),
            RemoveStorageError::Terminal(_)
        ));
    }

    #[test]
    fn test_conflicts_and_server_errors_are_retried() {
        for status in [
            StatusCode::CONFLICT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(matches!(
                removal_error("swift", "delete container", status, ""),
                RemoveStorageError::Retriable(_)
            ));
        }
    }

    #[test]
    fn test_storage_error_mentions_status() {
        let err = storage_error("azure", "create container", StatusCode::BAD_REQUEST, "nope\n");
        assert!(err.to_string().contains("HTTP 400: nope"));
    }
}
