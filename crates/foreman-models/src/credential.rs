//! OAuth2 client-credentials token for the gateway backend.
//!
//! The token is owned by the credential object and fetched lazily: the first
//! call obtains it, later calls reuse it until shortly before it expires, and
//! callers can invalidate it when the backend reports it as expired.

use foreman_abstraction::ModelError;
use reqwest::Client;
use serde::Deserialize;
use std::env;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Tokens are refreshed this long before their reported expiry.
const EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Lifetime assumed when the token endpoint does not report one.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// Client id/secret pair and the token endpoint they are exchanged at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// OAuth2 client id.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Token endpoint URL.
    pub auth_url: String,
}

impl ClientCredentials {
    /// Reads `GATEWAY_CLIENT_ID`, `GATEWAY_CLIENT_SECRET` and `GATEWAY_AUTH_URL`.
    ///
    /// # Errors
    /// Returns a `ModelError` naming the first missing variable.
    pub fn from_env() -> Result<Self, ModelError> {
        let read = |name: &str| {
            env::var(name).map_err(|_| {
                ModelError::UnsupportedModelProvider(format!(
                    "{name} environment variable not set"
                ))
            })
        };

        Ok(Self {
            client_id: read("GATEWAY_CLIENT_ID")?,
            client_secret: read("GATEWAY_CLIENT_SECRET")?,
            auth_url: read("GATEWAY_AUTH_URL")?,
        })
    }
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_SKEW < self.expires_at
    }
}

/// Lazily refreshed bearer token.
#[derive(Debug)]
pub struct GatewayCredential {
    credentials: ClientCredentials,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl GatewayCredential {
    /// Creates a credential; no request is made until a token is needed.
    #[must_use]
    pub fn new(credentials: ClientCredentials) -> Self {
        Self { credentials, client: Client::new(), token: Mutex::new(None) }
    }

    /// Returns a valid bearer token, fetching a new one if none is cached or
    /// the cached one is about to expire.
    ///
    /// # Errors
    /// Returns `AuthenticationFailed` if the token endpoint rejects the client.
    pub async fn bearer(&self) -> Result<String, ModelError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let token = self.fetch().await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    /// Drops the cached token so the next [`bearer`](Self::bearer) call refreshes it.
    pub async fn invalidate(&self) {
        debug!(auth_url = %self.credentials.auth_url, "Invalidating gateway token");
        *self.token.lock().await = None;
    }

    async fn fetch(&self) -> Result<CachedToken, ModelError> {
        debug!(auth_url = %self.credentials.auth_url, "Requesting gateway token");

        let response = self
            .client
            .post(&self.credentials.auth_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to reach gateway token endpoint");
                ModelError::RequestError(format!("Network error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, error = %error_text, "Gateway token request rejected");
            return Err(ModelError::AuthenticationFailed(format!(
                "Can't get the auth token ({}): {}",
                status, error_text
            )));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            ModelError::SerializationError(format!("Failed to parse token response: {}", e))
        })?;

        let lifetime = body.expires_in.map_or(DEFAULT_LIFETIME, Duration::from_secs);
        Ok(CachedToken { value: body.access_token, expires_at: Instant::now() + lifetime })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}
