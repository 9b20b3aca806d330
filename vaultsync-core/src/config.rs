//! Startup configuration: azure.json credentials plus flag/env values.
//!
//! [`Settings::resolve`] is the single validation point. It runs before any
//! remote call and fails with a [`ConfigError`] naming the first missing or
//! invalid field.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{
    ensure_directory, require, CloudEndpoints, SecretName, SyncTarget, VaultName,
};

/// Default credentials file, relative to the working directory.
pub const DEFAULT_AZURE_CONFIG: &str = "azure.json";

/// Default seconds between reconciliation cycles.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Default mode of the synced file: owner read/write only.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

// ---------------------------------------------------------------------------
// azure.json
// ---------------------------------------------------------------------------

/// The Kubernetes cloud-provider `azure.json` document.
///
/// Only the keys the sidecar uses are modelled; unknown keys are ignored.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AzureAuthConfig {
    pub cloud: String,
    pub tenant_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub aad_client_id: String,
    pub aad_client_secret: String,
    pub use_managed_identity_extension: bool,
    #[serde(rename = "userAssignedIdentityID")]
    pub user_assigned_identity_id: String,
}

impl fmt::Debug for AzureAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureAuthConfig")
            .field("cloud", &self.cloud)
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .field("resource_group", &self.resource_group)
            .field("aad_client_id", &self.aad_client_id)
            .field("aad_client_secret", &"<redacted>")
            .field(
                "use_managed_identity_extension",
                &self.use_managed_identity_extension,
            )
            .field("user_assigned_identity_id", &self.user_assigned_identity_id)
            .finish()
    }
}

/// Load and parse the azure.json file at `path`.
pub fn load_auth_config(path: &Path) -> Result<AzureAuthConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Material the token provider uses to mint tokens. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Service principal with a client secret.
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    /// Managed identity via the instance metadata service. `client_id`
    /// selects a user-assigned identity.
    ManagedIdentity { client_id: Option<String> },
}

impl Credentials {
    /// Pick credentials out of an azure.json document. Managed identity wins
    /// when `useManagedIdentityExtension` is set.
    pub fn from_auth_config(config: &AzureAuthConfig, path: &Path) -> Result<Self, ConfigError> {
        if config.use_managed_identity_extension {
            let client_id = Some(config.user_assigned_identity_id.trim())
                .filter(|id| !id.is_empty())
                .map(str::to_owned);
            return Ok(Credentials::ManagedIdentity { client_id });
        }

        let present = |s: &str| !s.trim().is_empty();
        if present(&config.tenant_id)
            && present(&config.aad_client_id)
            && present(&config.aad_client_secret)
        {
            Ok(Credentials::ClientSecret {
                tenant_id: config.tenant_id.trim().to_owned(),
                client_id: config.aad_client_id.trim().to_owned(),
                client_secret: config.aad_client_secret.clone(),
            })
        } else {
            Err(ConfigError::MissingCredentials {
                path: path.to_path_buf(),
            })
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ClientSecret {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ClientSecret")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
            Credentials::ManagedIdentity { client_id } => f
                .debug_struct("ManagedIdentity")
                .field("client_id", client_id)
                .finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Options -> Settings
// ---------------------------------------------------------------------------

/// Unvalidated values as they arrive from flags and environment.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub vault_name: Option<String>,
    pub secret_name: Option<String>,
    pub directory: Option<PathBuf>,
    pub resource_group: Option<String>,
    pub subscription_id: Option<String>,
    pub azure_config: PathBuf,
    pub interval_secs: u64,
    pub file_mode: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            vault_name: None,
            secret_name: None,
            directory: None,
            resource_group: None,
            subscription_id: None,
            azure_config: PathBuf::from(DEFAULT_AZURE_CONFIG),
            interval_secs: DEFAULT_INTERVAL_SECS,
            file_mode: format!("{DEFAULT_FILE_MODE:o}"),
        }
    }
}

/// Fully validated process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: SyncTarget,
    pub credentials: Credentials,
    pub cloud: CloudEndpoints,
    pub interval: Duration,
    pub file_mode: u32,
}

impl Settings {
    /// Validate `options`, load azure.json, and build the settings.
    ///
    /// Required flags are checked before the credentials file is read, so a
    /// missing `--vault-name` is reported even when azure.json is absent.
    pub fn resolve(options: SyncOptions) -> Result<Self, ConfigError> {
        let vault_name = required(
            options.vault_name,
            "vault name",
            "--vault-name",
            "VAULT_NAME",
        )?;
        let secret_name = required(
            options.secret_name,
            "secret name",
            "--secret-name",
            "SECRET_NAME",
        )?;
        let directory = options
            .directory
            .filter(|d| !d.as_os_str().is_empty())
            .ok_or(ConfigError::MissingField {
                field: "directory",
                flag: "--dir",
                env: "DIR",
            })?;

        let secret_name = SecretName::parse(&secret_name)?;
        ensure_directory(&directory)?;
        if options.interval_secs == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        let file_mode = parse_file_mode(&options.file_mode)?;

        let auth = load_auth_config(&options.azure_config)?;
        let subscription_id = options
            .subscription_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| auth.subscription_id.clone());
        require(
            &subscription_id,
            "subscription id",
            "--subscription-id",
            "SUBSCRIPTION_ID",
        )?;
        let resource_group = options
            .resource_group
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| auth.resource_group.clone());
        require(
            &resource_group,
            "resource group",
            "--resource-group",
            "RESOURCE_GROUP",
        )?;

        let cloud = CloudEndpoints::by_name(&auth.cloud)?;
        let credentials = Credentials::from_auth_config(&auth, &options.azure_config)?;

        let target = SyncTarget {
            vault_name: VaultName::from(vault_name),
            secret_name,
            resource_group: resource_group.trim().to_owned(),
            subscription_id: subscription_id.trim().to_owned(),
            directory,
        };
        target.validate()?;

        Ok(Settings {
            target,
            credentials,
            cloud,
            interval: Duration::from_secs(options.interval_secs),
            file_mode,
        })
    }
}

fn required(
    value: Option<String>,
    field: &'static str,
    flag: &'static str,
    env: &'static str,
) -> Result<String, ConfigError> {
    let value = value.unwrap_or_default();
    require(&value, field, flag, env)?;
    Ok(value.trim().to_owned())
}

/// Parse an octal mode (`600`, `0600`, `0o600`) and reject anything that
/// grants group or world access or denies the owner read.
pub fn parse_file_mode(raw: &str) -> Result<u32, ConfigError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| ConfigError::InvalidFileMode(raw.to_string()))?;
    if mode > 0o777 || mode & 0o077 != 0 || mode & 0o400 == 0 {
        return Err(ConfigError::InvalidFileMode(raw.to_string()));
    }
    Ok(mode)
}
