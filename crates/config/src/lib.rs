use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on `max_tokens` sent upstream, whatever the configuration says.
pub const MAX_TOKENS_CEILING: u32 = 1024;

const REDACTED: &str = "********";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is required for direct mode")]
    MissingApiKey,

    #[error("OPENAI_BASE_URL, CLIENT_ID, and CLIENT_SECRET are required for gateway mode")]
    MissingGatewaySettings,

    #[error("OPENAI_BASE_URL is not a valid URL: {0}")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Direct,
    Gateway,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Direct => write!(f, "direct"),
            Mode::Gateway => write!(f, "gateway"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(Mode::Direct),
            "gateway" => Ok(Mode::Gateway),
            other => Err(format!("unknown mode '{other}' (expected direct or gateway)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Everything gateway mode needs, checked for presence.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_max_tokens() -> u32 {
    500
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_sessions() -> usize {
    50
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Direct,
            api_key: None,
            base_url: None,
            client_id: None,
            client_secret: None,
            token_url: None,
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_sessions: default_max_sessions(),
        }
    }
}

impl ServerConfig {
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
    }
}

impl ProviderConfig {
    /// The configured `max_tokens`, clamped to [`MAX_TOKENS_CEILING`].
    pub fn effective_max_tokens(&self) -> u32 {
        self.max_tokens.min(MAX_TOKENS_CEILING)
    }

    pub fn direct_api_key(&self) -> std::result::Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn gateway_settings(&self) -> std::result::Result<GatewaySettings, ConfigError> {
        let present = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        match (
            present(&self.base_url),
            present(&self.client_id),
            present(&self.client_secret),
        ) {
            (Some(base_url), Some(client_id), Some(client_secret)) => Ok(GatewaySettings {
                base_url,
                client_id,
                client_secret,
                token_url: present(&self.token_url),
            }),
            _ => Err(ConfigError::MissingGatewaySettings),
        }
    }
}

impl HistoryConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("history.json"))
    }
}

impl Config {
    /// Loads the config file (if any) and overlays the process environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Overlays environment-style settings. Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(origins) = var("ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(host) = var("DEVMATE_HOST") {
            self.server.host = host.trim().to_string();
        }
        if let Some(raw) = var("DEVMATE_PORT") {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Invalid DEVMATE_PORT='{raw}', keeping {}", self.server.port),
            }
        }

        if let Some(raw) = var("MODE") {
            match raw.parse::<Mode>() {
                Ok(mode) => self.provider.mode = mode,
                Err(e) => {
                    tracing::warn!("{e}, falling back to direct mode");
                    self.provider.mode = Mode::Direct;
                }
            }
        }
        if let Some(key) = var("OPENAI_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = var("OPENAI_BASE_URL") {
            self.provider.base_url = Some(url);
        }
        if let Some(id) = var("CLIENT_ID") {
            self.provider.client_id = Some(id);
        }
        if let Some(secret) = var("CLIENT_SECRET") {
            self.provider.client_secret = Some(secret);
        }
        if let Some(url) = var("TOKEN_URL") {
            self.provider.token_url = Some(url);
        }
        if let Some(raw) = var("MAX_TOKENS") {
            match raw.trim().parse::<u32>() {
                Ok(n) => self.provider.max_tokens = n,
                Err(_) => tracing::warn!(
                    "Invalid MAX_TOKENS='{raw}', keeping {}",
                    self.provider.max_tokens
                ),
            }
        }
        if let Some(raw) = var("REQUEST_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(n) => self.provider.request_timeout_secs = n,
                Err(_) => tracing::warn!(
                    "Invalid REQUEST_TIMEOUT_SECS='{raw}', keeping {}",
                    self.provider.request_timeout_secs
                ),
            }
        }

        if let Some(path) = var("DEVMATE_HISTORY") {
            self.history.path = Some(PathBuf::from(path));
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("devmate")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("devmate")
    }

    /// A copy safe to print: credentials are masked.
    pub fn redacted(&self) -> Config {
        let mask = |v: &Option<String>| v.as_ref().map(|_| REDACTED.to_string());
        let mut copy = self.clone();
        copy.provider.api_key = mask(&self.provider.api_key);
        copy.provider.client_secret = mask(&self.provider.client_secret);
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.provider.mode, Mode::Direct);
        assert_eq!(config.provider.max_tokens, 500);
        assert_eq!(config.history.max_sessions, 50);
    }

    #[test]
    fn env_overrides_provider_settings() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("MODE", "gateway"),
            ("OPENAI_BASE_URL", "https://gw.example.com/v1"),
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
            ("MAX_TOKENS", "5000"),
        ]));
        assert_eq!(config.provider.mode, Mode::Gateway);
        let gw = config.provider.gateway_settings().unwrap();
        assert_eq!(gw.base_url, "https://gw.example.com/v1");
        assert_eq!(gw.client_id, "id");
        assert_eq!(config.provider.max_tokens, 5000);
        assert_eq!(config.provider.effective_max_tokens(), MAX_TOKENS_CEILING);
    }

    #[test]
    fn allowed_origins_split_and_trimmed() {
        let mut config = Config::default();
        config.apply_env(env(&[(
            "ALLOWED_ORIGINS",
            "https://a.example, https://b.example,,",
        )]));
        assert_eq!(
            config.server.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert!(config.server.is_origin_allowed("https://b.example"));
        assert!(!config.server.is_origin_allowed("https://c.example"));
    }

    #[test]
    fn invalid_numbers_keep_defaults() {
        let mut config = Config::default();
        config.apply_env(env(&[("MAX_TOKENS", "lots"), ("DEVMATE_PORT", "http")]));
        assert_eq!(config.provider.max_tokens, 500);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn unknown_mode_falls_back_to_direct() {
        let mut config = Config::default();
        config.provider.mode = Mode::Gateway;
        config.apply_env(env(&[("MODE", "proxy")]));
        assert_eq!(config.provider.mode, Mode::Direct);
    }

    #[test]
    fn empty_api_key_is_missing() {
        let mut config = Config::default();
        config.apply_env(env(&[("OPENAI_API_KEY", "")]));
        let err = config.provider.direct_api_key().unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn gateway_requires_all_three_settings() {
        let mut config = Config::default();
        config.apply_env(env(&[("CLIENT_ID", "id"), ("CLIENT_SECRET", "secret")]));
        let err = config.provider.gateway_settings().unwrap_err();
        assert!(err.to_string().contains("CLIENT_SECRET"));
    }

    #[test]
    fn load_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[provider]\nmode = \"gateway\"\nmax_tokens = 800\n\n[server]\nport = 8081\n",
        )
        .unwrap();
        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.provider.mode, Mode::Gateway);
        assert_eq!(config.provider.max_tokens, 800);
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.provider.max_tokens, 500);
    }

    #[test]
    fn redacted_masks_secrets() {
        let mut config = Config::default();
        config.provider.api_key = Some("sk-live".into());
        config.provider.client_secret = Some("shh".into());
        let shown = config.redacted();
        assert_eq!(shown.provider.api_key.as_deref(), Some(REDACTED));
        assert_eq!(shown.provider.client_secret.as_deref(), Some(REDACTED));
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-live"));
    }
}
