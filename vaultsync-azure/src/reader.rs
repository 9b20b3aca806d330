//! Key Vault data-plane secret reads.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use vaultsync_core::{RemoteError, SecretName, SecretReader, SecretValue, Token, VaultEndpoint};

use crate::client::{decode_json, transport_error};

/// Key Vault data-plane API version.
pub const KEY_VAULT_API_VERSION: &str = "2016-10-01";

pub struct KeyVaultSecretReader {
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

impl KeyVaultSecretReader {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

/// `<vault>/secrets/<name>?api-version=...`; an empty version segment
/// selects the latest version.
fn secret_url(endpoint: &VaultEndpoint, secret_name: &SecretName) -> Result<Url, RemoteError> {
    let mut url = Url::parse(endpoint.base()).map_err(|err| RemoteError::Malformed {
        message: format!("invalid vault URI '{endpoint}': {err}"),
    })?;
    url.path_segments_mut()
        .map_err(|_| RemoteError::Malformed {
            message: format!("vault URI '{endpoint}' cannot be a base"),
        })?
        .pop_if_empty()
        .extend(["secrets", secret_name.as_str()]);
    url.query_pairs_mut()
        .append_pair("api-version", KEY_VAULT_API_VERSION);
    Ok(url)
}

#[async_trait]
impl SecretReader for KeyVaultSecretReader {
    async fn fetch(
        &self,
        endpoint: &VaultEndpoint,
        secret_name: &SecretName,
        token: &Token,
    ) -> Result<SecretValue, RemoteError> {
        let url = secret_url(endpoint, secret_name)?;
        tracing::debug!(secret = %secret_name, vault = %endpoint, "fetching secret");

        let response = self
            .http
            .get(url)
            .bearer_auth(&token.value)
            .send()
            .await
            .map_err(transport_error)?;

        let bundle: SecretBundle = decode_json(response, "secret read").await?;
        bundle
            .value
            .map(SecretValue::from)
            .ok_or_else(|| RemoteError::Malformed {
                message: format!("secret '{secret_name}' response has no value"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_url_joins_vault_and_name() {
        let endpoint = VaultEndpoint("https://kv-prod.vault.azure.net/".to_string());
        let name = SecretName::parse("db-password").unwrap();
        assert_eq!(
            secret_url(&endpoint, &name).unwrap().as_str(),
            "https://kv-prod.vault.azure.net/secrets/db-password?api-version=2016-10-01"
        );
    }

    #[test]
    fn garbage_endpoint_is_malformed() {
        let endpoint = VaultEndpoint("not a url".to_string());
        let name = SecretName::parse("x").unwrap();
        assert!(matches!(
            secret_url(&endpoint, &name),
            Err(RemoteError::Malformed { .. })
        ));
    }
}
