use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::AuthError;

/// Tokens are treated as expired this long before the gateway says so.
pub const EXPIRY_MARGIN_SECS: i64 = 300;

const CLIENT_ID_HEADER: &str = "x-client-id";
const CLIENT_SECRET_HEADER: &str = "x-client-secret";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: String, expires_at: DateTime<Utc>) -> Self {
        Self { value, expires_at }
    }

    pub fn secret(&self) -> &str {
        &self.value
    }

    /// Expiry with the safety margin already subtracted.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"..")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Obtains and caches the gateway bearer token.
///
/// The cache lock is held across acquisition, so concurrent callers wait for
/// the in-flight request instead of issuing their own.
pub struct TokenManager {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenManager {
    pub fn new(
        http: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        let token_url = token_url.into();
        tracing::info!(%token_url, "Gateway token endpoint configured");
        Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url,
            cached: Mutex::new(None),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub async fn get_access_token(&self) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_valid_at(Utc::now())) {
            tracing::debug!("Using cached gateway token");
            return Ok(token.clone());
        }

        let token = self.acquire_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drops the cached token and acquires a fresh one.
    pub async fn refresh_token(&self) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock().await;
        *cached = None;

        let token = self.acquire_token().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn acquire_token(&self) -> Result<AccessToken, AuthError> {
        let resp = self
            .http
            .post(&self.token_url)
            .header(CLIENT_ID_HEADER, &self.client_id)
            .header(CLIENT_SECRET_HEADER, &self.client_secret)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Token request failed: {e}");
                AuthError::Transport(e.to_string())
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Gateway rejected token request");
            return Err(AuthError::TokenRejected {
                status: status.as_u16(),
                body,
            });
        }

        let data: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        let expires_at = Duration::try_seconds(data.expires_in.saturating_sub(EXPIRY_MARGIN_SECS))
            .and_then(|usable| Utc::now().checked_add_signed(usable))
            .ok_or_else(|| {
                AuthError::InvalidResponse(format!("expires_in out of range: {}", data.expires_in))
            })?;
        tracing::info!(expires_in = data.expires_in, "Acquired gateway access token");

        Ok(AccessToken::new(data.access_token, expires_at))
    }
}
