//! Error types for vaultsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use vaultsync_core::{Audience, RemoteError};

/// Why a reconciliation cycle failed. A failed cycle never writes.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A token could not be acquired.
    #[error("failed to get {audience} token: {source}")]
    Authentication {
        audience: Audience,
        #[source]
        source: RemoteError,
    },

    /// The vault's endpoint could not be determined.
    #[error("failed to get key vault '{vault}': {source}")]
    Resolution {
        vault: String,
        #[source]
        source: RemoteError,
    },

    /// The secret could not be read from the vault.
    #[error("failed to get secret '{secret}': {source}")]
    Fetch {
        secret: String,
        #[source]
        source: RemoteError,
    },

    /// The local copy could not be read or written.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cycle was stopped before it reached the write.
    #[error("cycle cancelled")]
    Cancelled,

    /// A blocking filesystem task panicked or was aborted.
    #[error("filesystem task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Short category name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Authentication { .. } => "authentication",
            SyncError::Resolution { .. } => "resolution",
            SyncError::Fetch { .. } => "fetch",
            SyncError::Io { .. } | SyncError::Task(_) => "persistence",
            SyncError::Cancelled => "cancelled",
        }
    }

    /// The remote failure behind this error, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Authentication { source, .. }
            | SyncError::Resolution { source, .. }
            | SyncError::Fetch { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
