use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use devmate_auth::{Credential, TokenManager};
use devmate_config::{ConfigError, GatewaySettings, Mode, ProviderConfig};

use crate::openai::OpenAIClient;
use crate::ChatModel;

const TOKEN_PATH: &str = "/oauth/token";
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Hands out an authenticated completion client for each request.
#[async_trait]
pub trait ModelClientFactory: Send + Sync {
    async fn create_client(&self) -> Result<Box<dyn ChatModel>>;
}

/// Builds [`OpenAIClient`]s in direct or gateway mode.
///
/// In gateway mode the factory owns the one [`TokenManager`] for its
/// lifetime: created on the first gateway request, reused afterwards.
pub struct ClientFactory {
    config: ProviderConfig,
    http: reqwest::Client,
    token_manager: OnceLock<Arc<TokenManager>>,
}

impl ClientFactory {
    pub fn new(config: ProviderConfig) -> Self {
        // Per-read idle limit. A stream may outlast `request_timeout_secs`.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self::with_http(config, http)
    }

    pub fn with_http(config: ProviderConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            token_manager: OnceLock::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    /// The gateway token manager, if a gateway client was ever requested.
    pub fn token_manager(&self) -> Option<&Arc<TokenManager>> {
        self.token_manager.get()
    }

    fn gateway_token_manager(&self, settings: &GatewaySettings) -> Result<&Arc<TokenManager>> {
        if let Some(manager) = self.token_manager.get() {
            return Ok(manager);
        }

        let token_url = match &settings.token_url {
            Some(url) => url.clone(),
            None => derive_token_url(&settings.base_url)?,
        };

        Ok(self.token_manager.get_or_init(|| {
            Arc::new(TokenManager::new(
                self.http.clone(),
                settings.client_id.clone(),
                settings.client_secret.clone(),
                token_url,
            ))
        }))
    }
}

#[async_trait]
impl ModelClientFactory for ClientFactory {
    async fn create_client(&self) -> Result<Box<dyn ChatModel>> {
        match self.config.mode {
            Mode::Direct => {
                let key = self.config.direct_api_key()?;
                let client = OpenAIClient::new(
                    self.http.clone(),
                    self.config.base_url.clone(),
                    Credential::ApiKey(key.to_string()),
                )?;
                Ok(Box::new(client))
            }
            Mode::Gateway => {
                let settings = self.config.gateway_settings()?;
                let manager = self.gateway_token_manager(&settings)?;
                let token = manager.get_access_token().await?;
                let client =
                    OpenAIClient::new(self.http.clone(), Some(settings.base_url), token.into())?;
                Ok(Box::new(client))
            }
        }
    }
}

/// The gateway's token endpoint lives at the root of the API host.
pub fn derive_token_url(base_url: &str) -> std::result::Result<String, ConfigError> {
    let mut url =
        url::Url::parse(base_url).map_err(|e| ConfigError::InvalidBaseUrl(e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidBaseUrl(base_url.to_string()));
    }
    url.set_path(TOKEN_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}
