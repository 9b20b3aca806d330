//! Domain types for secret synchronisation.
//!
//! All path fields use `PathBuf`. Secret material ([`SecretValue`], [`Token`])
//! never prints its content through `Debug`.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of the remote Key Vault instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultName(pub String);

impl fmt::Display for VaultName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for VaultName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for VaultName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Name of the secret inside the vault; doubles as the local file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretName(pub String);

impl SecretName {
    /// Parse a secret name, rejecting anything that is not a single plain
    /// path component.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let valid = !trimmed.is_empty()
            && trimmed != "."
            && trimmed != ".."
            && !trimmed.contains(['/', '\\', '\0']);
        if valid {
            Ok(Self(trimmed.to_owned()))
        } else {
            Err(ConfigError::InvalidSecretName(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecretName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// SyncTarget
// ---------------------------------------------------------------------------

/// What to sync and where. Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub vault_name: VaultName,
    pub secret_name: SecretName,
    pub resource_group: String,
    pub subscription_id: String,
    pub directory: PathBuf,
}

impl SyncTarget {
    /// `<directory>/<secret_name>`.
    pub fn local_path(&self) -> PathBuf {
        self.directory.join(self.secret_name.as_str())
    }

    /// Check that every field is populated.
    ///
    /// [`crate::Settings::resolve`] already guarantees this; the check is
    /// public so hand-built targets (tests, embedders) get the same rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(&self.vault_name.0, "vault name", "--vault-name", "VAULT_NAME")?;
        require(&self.secret_name.0, "secret name", "--secret-name", "SECRET_NAME")?;
        require(
            &self.resource_group,
            "resource group",
            "--resource-group",
            "RESOURCE_GROUP",
        )?;
        require(
            &self.subscription_id,
            "subscription id",
            "--subscription-id",
            "SUBSCRIPTION_ID",
        )?;
        if self.directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "directory",
                flag: "--dir",
                env: "DIR",
            });
        }
        Ok(())
    }
}

pub(crate) fn require(
    value: &str,
    field: &'static str,
    flag: &'static str,
    env: &'static str,
) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingField { field, flag, env })
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Clouds and audiences
// ---------------------------------------------------------------------------

/// Endpoints of one Azure cloud environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEndpoints {
    /// Azure AD authority host, e.g. `https://login.microsoftonline.com`.
    pub authority: String,
    /// Resource Manager base URL; also the management token resource.
    pub resource_manager: String,
    /// Key Vault data-plane token resource.
    pub key_vault_resource: String,
}

impl CloudEndpoints {
    pub fn public() -> Self {
        Self {
            authority: "https://login.microsoftonline.com".to_string(),
            resource_manager: "https://management.azure.com/".to_string(),
            key_vault_resource: "https://vault.azure.net".to_string(),
        }
    }

    /// Look up a cloud by the name used in azure.json (`AzurePublicCloud`, ...).
    /// An empty name means the public cloud.
    pub fn by_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "azurepubliccloud" => Ok(Self::public()),
            "azurechinacloud" => Ok(Self {
                authority: "https://login.chinacloudapi.cn".to_string(),
                resource_manager: "https://management.chinacloudapi.cn/".to_string(),
                key_vault_resource: "https://vault.azure.cn".to_string(),
            }),
            "azureusgovernmentcloud" => Ok(Self {
                authority: "https://login.microsoftonline.us".to_string(),
                resource_manager: "https://management.usgovcloudapi.net/".to_string(),
                key_vault_resource: "https://vault.usgovcloudapi.net".to_string(),
            }),
            "azuregermancloud" => Ok(Self {
                authority: "https://login.microsoftonline.de".to_string(),
                resource_manager: "https://management.microsoftazure.de/".to_string(),
                key_vault_resource: "https://vault.microsoftazure.de".to_string(),
            }),
            _ => Err(ConfigError::UnknownCloud(name.to_string())),
        }
    }

    /// Token resource string for `audience`.
    pub fn resource_for(&self, audience: Audience) -> &str {
        match audience {
            Audience::Management => &self.resource_manager,
            Audience::Data => &self.key_vault_resource,
        }
    }
}

/// The API surface a token is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    /// Resource Manager (vault lookup).
    Management,
    /// Key Vault data plane (secret reads).
    Data,
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::Management => write!(f, "management"),
            Audience::Data => write!(f, "data"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tokens, endpoints, values
// ---------------------------------------------------------------------------

/// A bearer token for one audience.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub audience: Audience,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// True when the token expires within `skew` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        self.expires_at - skew <= now
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("audience", &self.audience)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Resolved data-plane base URI of a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEndpoint(pub String);

impl VaultEndpoint {
    /// Base URI without a trailing slash, ready for path joins.
    pub fn base(&self) -> &str {
        self.0.trim_end_matches('/')
    }
}

impl fmt::Display for VaultEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Plaintext secret content as returned by the store.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Vec<u8>);

impl SecretValue {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecretValue {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&str> for SecretValue {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue(<{} bytes>)", self.0.len())
    }
}

/// Fails unless `path` is an existing directory.
pub fn ensure_directory(path: &Path) -> Result<(), ConfigError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(ConfigError::DirectoryMissing {
            path: path.to_path_buf(),
        })
    }
}
