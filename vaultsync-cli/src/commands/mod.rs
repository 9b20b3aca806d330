pub mod run;
pub mod sync;

use std::path::PathBuf;

use clap::Args;
use vaultsync_core::config::{DEFAULT_AZURE_CONFIG, DEFAULT_FILE_MODE, DEFAULT_INTERVAL_SECS};
use vaultsync_core::{ConfigError, Settings, SyncOptions};

/// Flags shared by `run` and `sync`. Each falls back to an environment
/// variable of the same meaning.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Key Vault instance name.
    #[arg(long, env = "VAULT_NAME")]
    pub vault_name: Option<String>,

    /// Secret to sync; also the file name under `--dir`.
    #[arg(long, env = "SECRET_NAME")]
    pub secret_name: Option<String>,

    /// Existing directory to write the secret into.
    #[arg(long = "dir", env = "DIR")]
    pub dir: Option<PathBuf>,

    /// Resource group of the vault (overrides azure.json).
    #[arg(long, env = "RESOURCE_GROUP")]
    pub resource_group: Option<String>,

    /// Subscription of the vault (overrides azure.json).
    #[arg(long, env = "SUBSCRIPTION_ID")]
    pub subscription_id: Option<String>,

    /// Path to the azure.json credentials file.
    #[arg(long, env = "AZURE_CONFIG_FILE", default_value = DEFAULT_AZURE_CONFIG)]
    pub azure_config: PathBuf,

    /// Seconds between reconciliation cycles.
    #[arg(long, env = "SYNC_INTERVAL_SECS", default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// Octal mode of the synced file; group and world bits are refused.
    #[arg(long, env = "FILE_MODE", default_value_t = format!("{DEFAULT_FILE_MODE:o}"))]
    pub file_mode: String,
}

impl TargetArgs {
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        Settings::resolve(SyncOptions {
            vault_name: self.vault_name,
            secret_name: self.secret_name,
            directory: self.dir,
            resource_group: self.resource_group,
            subscription_id: self.subscription_id,
            azure_config: self.azure_config,
            interval_secs: self.interval,
            file_mode: self.file_mode,
        })
    }
}
