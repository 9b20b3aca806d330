//! vaultsync core library — domain types, configuration, remote contracts.
//!
//! - [`types`] — newtypes, [`SyncTarget`], tokens and secret values
//! - [`config`] — azure.json loading and startup validation
//! - [`remote`] — the token / resolver / reader traits the sync engine drives
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod error;
pub mod remote;
pub mod types;

pub use config::{AzureAuthConfig, Credentials, Settings, SyncOptions};
pub use error::ConfigError;
pub use remote::{RemoteError, SecretReader, TokenProvider, VaultResolver};
pub use types::{
    Audience, CloudEndpoints, SecretName, SecretValue, SyncTarget, Token, VaultEndpoint,
    VaultName,
};
