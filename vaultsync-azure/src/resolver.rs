//! Resource Manager lookup of a vault's data-plane URI.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use vaultsync_core::{RemoteError, Token, VaultEndpoint, VaultName, VaultResolver};

use crate::client::{decode_json, transport_error};

/// Microsoft.KeyVault management API version.
pub const ARM_API_VERSION: &str = "2016-10-01";

pub struct ArmVaultResolver {
    http: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct VaultResource {
    properties: Option<VaultProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultProperties {
    vault_uri: Option<String>,
}

impl ArmVaultResolver {
    /// `base` is the Resource Manager root, e.g. `https://management.azure.com/`.
    pub fn new(http: reqwest::Client, base: &str) -> Self {
        Self {
            http,
            base: base.to_string(),
        }
    }

    fn vault_url(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &VaultName,
    ) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.base).map_err(|err| RemoteError::Malformed {
            message: format!("invalid resource manager URL '{}': {err}", self.base),
        })?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Malformed {
                message: format!("resource manager URL '{}' cannot be a base", self.base),
            })?
            .pop_if_empty()
            .extend([
                "subscriptions",
                subscription_id,
                "resourceGroups",
                resource_group,
                "providers",
                "Microsoft.KeyVault",
                "vaults",
                vault_name.0.as_str(),
            ]);
        url.query_pairs_mut()
            .append_pair("api-version", ARM_API_VERSION);
        Ok(url)
    }
}

#[async_trait]
impl VaultResolver for ArmVaultResolver {
    async fn resolve(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &VaultName,
        token: &Token,
    ) -> Result<VaultEndpoint, RemoteError> {
        let url = self.vault_url(subscription_id, resource_group, vault_name)?;
        tracing::debug!(vault = %vault_name, resource_group, "resolving vault");

        let response = self
            .http
            .get(url)
            .bearer_auth(&token.value)
            .send()
            .await
            .map_err(transport_error)?;

        let vault: VaultResource = decode_json(response, "vault lookup").await?;
        vault
            .properties
            .and_then(|p| p.vault_uri)
            .filter(|uri| !uri.trim().is_empty())
            .map(VaultEndpoint)
            .ok_or_else(|| RemoteError::Malformed {
                message: format!("vault '{vault_name}' has no properties.vaultUri"),
            })
    }
}
