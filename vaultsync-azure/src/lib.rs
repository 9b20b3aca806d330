//! # vaultsync-azure
//!
//! HTTP implementations of the remote contracts in `vaultsync-core`:
//!
//! - [`token`] — Azure AD client-credentials and managed-identity tokens
//! - [`cache`] — per-audience token cache honouring expiry
//! - [`resolver`] — Resource Manager vault lookup
//! - [`reader`] — Key Vault secret reads
//!
//! [`AzureBackend::from_settings`] wires all three for the daemon.

pub mod cache;
mod client;
pub mod reader;
pub mod resolver;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use vaultsync_core::{RemoteError, SecretReader, Settings, TokenProvider, VaultResolver};

pub use cache::CachingTokenProvider;
pub use reader::KeyVaultSecretReader;
pub use resolver::ArmVaultResolver;
pub use token::{ClientSecretProvider, ManagedIdentityProvider};

/// Per-request timeout for every Azure call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The three collaborators the reconciler needs, backed by Azure.
#[derive(Clone)]
pub struct AzureBackend {
    pub tokens: Arc<dyn TokenProvider>,
    pub resolver: Arc<dyn VaultResolver>,
    pub reader: Arc<dyn SecretReader>,
}

impl AzureBackend {
    /// Build HTTP clients for the configured cloud and credentials.
    ///
    /// Tokens are cached per audience until shortly before they expire.
    pub fn from_settings(settings: &Settings) -> Result<Self, RemoteError> {
        let http = client::http_client(REQUEST_TIMEOUT)?;
        let tokens = token::provider_for(&settings.credentials, &settings.cloud, http.clone());
        Ok(Self {
            tokens: Arc::new(CachingTokenProvider::new(tokens)),
            resolver: Arc::new(ArmVaultResolver::new(
                http.clone(),
                &settings.cloud.resource_manager,
            )),
            reader: Arc::new(KeyVaultSecretReader::new(http)),
        })
    }
}
