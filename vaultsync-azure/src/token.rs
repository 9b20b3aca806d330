//! Azure AD token acquisition.
//!
//! Two flows, both using the v1 `resource` parameter:
//!
//! - [`ClientSecretProvider`] — `client_credentials` grant against
//!   `<authority>/<tenant>/oauth2/token`.
//! - [`ManagedIdentityProvider`] — the instance metadata service at
//!   `169.254.169.254`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::Value;

use vaultsync_core::{Audience, CloudEndpoints, Credentials, RemoteError, Token, TokenProvider};

use crate::client::{decode_json, transport_error};

/// IMDS base URL.
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const IMDS_API_VERSION: &str = "2018-02-01";

/// Lifetime assumed when a token response omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Upper bound on a server-reported lifetime; AAD never issues longer.
const MAX_EXPIRES_IN_SECS: i64 = 86_400;

/// Choose the provider matching `credentials`.
pub fn provider_for(
    credentials: &Credentials,
    cloud: &CloudEndpoints,
    http: reqwest::Client,
) -> Arc<dyn TokenProvider> {
    match credentials {
        Credentials::ClientSecret {
            tenant_id,
            client_id,
            client_secret,
        } => Arc::new(ClientSecretProvider::new(
            http,
            cloud.clone(),
            tenant_id.as_str(),
            client_id.as_str(),
            client_secret.as_str(),
        )),
        Credentials::ManagedIdentity { client_id } => Arc::new(ManagedIdentityProvider::new(
            http,
            cloud.clone(),
            client_id.clone(),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    // AAD v1 returns this as a string, IMDS as a string or number.
    expires_in: Option<Value>,
}

impl TokenResponse {
    fn into_token(self, audience: Audience) -> Token {
        let expires_in = self
            .expires_in
            .as_ref()
            .and_then(|v| match v {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
            .clamp(0, MAX_EXPIRES_IN_SECS);
        let now = Utc::now();
        let expires_at = ChronoDuration::try_seconds(expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or_else(|| now + ChronoDuration::seconds(DEFAULT_EXPIRES_IN_SECS));
        Token {
            value: self.access_token,
            audience,
            expires_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Client secret
// ---------------------------------------------------------------------------

/// Service-principal tokens via the client-credentials grant.
pub struct ClientSecretProvider {
    http: reqwest::Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cloud: CloudEndpoints,
}

impl ClientSecretProvider {
    /// Point the provider at a different authority host (tests, sovereign
    /// clouds behind proxies).
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn new(
        http: reqwest::Client,
        cloud: CloudEndpoints,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            authority: cloud.authority.clone(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cloud,
        }
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/token",
            self.authority.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[async_trait]
impl TokenProvider for ClientSecretProvider {
    async fn acquire(&self, audience: Audience) -> Result<Token, RemoteError> {
        let resource = self.cloud.resource_for(audience);
        tracing::debug!(%audience, resource, "requesting client-credentials token");

        let response = self
            .http
            .post(self.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("resource", resource),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let body: TokenResponse = decode_json(response, "token request").await?;
        Ok(body.into_token(audience))
    }
}

// ---------------------------------------------------------------------------
// Managed identity
// ---------------------------------------------------------------------------

/// Tokens from the instance metadata service.
pub struct ManagedIdentityProvider {
    http: reqwest::Client,
    endpoint: String,
    client_id: Option<String>,
    cloud: CloudEndpoints,
}

impl ManagedIdentityProvider {
    pub fn new(http: reqwest::Client, cloud: CloudEndpoints, client_id: Option<String>) -> Self {
        Self {
            http,
            endpoint: IMDS_ENDPOINT.to_string(),
            client_id,
            cloud,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl TokenProvider for ManagedIdentityProvider {
    async fn acquire(&self, audience: Audience) -> Result<Token, RemoteError> {
        let resource = self.cloud.resource_for(audience);
        tracing::debug!(%audience, resource, "requesting managed identity token");

        let mut query = vec![("api-version", IMDS_API_VERSION), ("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let response = self
            .http
            .get(format!(
                "{}/metadata/identity/oauth2/token",
                self.endpoint.trim_end_matches('/')
            ))
            .header("Metadata", "true")
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        let body: TokenResponse = decode_json(response, "managed identity token request").await?;
        Ok(body.into_token(audience))
    }
}
