//! Error types for vaultsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while turning flags, environment and the
/// azure.json file into a validated [`crate::Settings`].
///
/// All variants are raised before the first remote call.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required value was absent or blank.
    #[error("{field} is unset (set {flag} or env {env})")]
    MissingField {
        field: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    /// The secret name would not map to a single file inside the target directory.
    #[error("secret name '{0}' is not a valid file name")]
    InvalidSecretName(String),

    /// The file mode could not be parsed or grants group/world access.
    #[error("file mode '{0}' must be octal and grant no group or world access")]
    InvalidFileMode(String),

    /// The reconciliation interval was zero.
    #[error("sync interval must be at least one second")]
    InvalidInterval,

    /// The target directory is missing or not a directory.
    #[error("target directory {path} is not an existing directory")]
    DirectoryMissing { path: PathBuf },

    /// The azure.json file could not be read.
    #[error("failed to read azure config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The azure.json file is not valid JSON for [`crate::AzureAuthConfig`].
    #[error("failed to parse azure config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Neither a client secret nor managed identity is configured.
    #[error("azure config at {path} has no usable credentials (aadClientId/aadClientSecret or useManagedIdentityExtension)")]
    MissingCredentials { path: PathBuf },

    /// The `cloud` field names an environment we have no endpoints for.
    #[error("unknown azure cloud '{0}'")]
    UnknownCloud(String),
}
