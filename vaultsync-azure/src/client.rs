//! Shared reqwest plumbing: client construction and response classification.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use vaultsync_core::RemoteError;

/// Longest error body excerpt carried into a [`RemoteError`].
const MAX_ERROR_BODY: usize = 512;

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, RemoteError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("vaultsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| RemoteError::Malformed {
            message: format!("failed to build HTTP client: {err}"),
        })
}

/// A request that never got a response is always worth retrying.
pub(crate) fn transport_error(err: reqwest::Error) -> RemoteError {
    RemoteError::Transient {
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}

/// Azure's `{"error": {"code": ..., "message": ...}}` envelope. AAD uses
/// `{"error": "...", "error_description": "..."}` instead; both are tried.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Arm { error: ArmError },
    Aad {
        error: String,
        error_description: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ArmError {
    code: Option<String>,
    message: Option<String>,
}

fn summarize_error_body(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody::Arm { error }) => match (error.code, error.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (Some(code), None) => code,
            (None, Some(message)) => message,
            (None, None) => "no error detail".to_string(),
        },
        Ok(ErrorBody::Aad {
            error,
            error_description,
        }) => match error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        },
        Err(_) => body.chars().take(MAX_ERROR_BODY).collect(),
    }
}

/// Turn a response into `T`, classifying non-2xx statuses.
pub(crate) async fn decode_json<T: DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = summarize_error_body(&body);
        return Err(RemoteError::from_status(
            status.as_u16(),
            format!("{what}: {detail}"),
        ));
    }

    response
        .json::<T>()
        .await
        .map_err(|err| RemoteError::Malformed {
            message: format!("{what}: {err}"),
        })
}
