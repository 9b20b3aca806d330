//! Contracts for the remote collaborators driven by the sync engine.
//!
//! The engine only ever sees these traits; `vaultsync-azure` provides the
//! HTTP implementations and tests provide in-memory ones.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Audience, SecretName, SecretValue, Token, VaultEndpoint, VaultName};

/// Failure of a remote call, classified so callers can decide whether a
/// retry makes sense.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Credentials were rejected or lack permission (HTTP 400/401/403).
    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// The vault or secret does not exist (HTTP 404).
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Network failure, throttling or a server-side error.
    #[error("transient failure{}: {}", status_suffix(.status), .message)]
    Transient {
        status: Option<u16>,
        message: String,
    },

    /// The response could not be understood.
    #[error("malformed response: {message}")]
    Malformed { message: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl RemoteError {
    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient { .. })
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 401 | 403 => RemoteError::Unauthorized { status, message },
            404 => RemoteError::NotFound { message },
            408 | 429 | 500..=599 => RemoteError::Transient {
                status: Some(status),
                message,
            },
            _ => RemoteError::Malformed {
                message: format!("unexpected status {status}: {message}"),
            },
        }
    }
}

/// Exchanges credentials for bearer tokens.
///
/// Callers ask for a token per audience per use and make no assumption
/// about caching; implementations may cache internally.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire(&self, audience: Audience) -> Result<Token, RemoteError>;
}

/// Resolves a vault's data-plane URI through the management plane.
///
/// Must be side-effect free. The answer may change between calls if the
/// vault is reconfigured.
#[async_trait]
pub trait VaultResolver: Send + Sync {
    async fn resolve(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &VaultName,
        token: &Token,
    ) -> Result<VaultEndpoint, RemoteError>;
}

/// Reads the current value of a secret from a vault.
#[async_trait]
pub trait SecretReader: Send + Sync {
    async fn fetch(
        &self,
        endpoint: &VaultEndpoint,
        secret_name: &SecretName,
        token: &Token,
    ) -> Result<SecretValue, RemoteError>;
}
