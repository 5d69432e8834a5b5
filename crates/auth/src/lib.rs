pub mod token;

mod error;

pub use error::AuthError;
pub use token::{AccessToken, TokenManager};

/// How a request to the completion API is authenticated.
#[derive(Clone)]
pub enum Credential {
    /// Static key issued by the provider (direct mode).
    ApiKey(String),
    /// Short-lived token obtained from the gateway's token endpoint.
    Bearer(String),
}

impl Credential {
    pub fn header_value(&self) -> String {
        match self {
            Credential::ApiKey(key) => format!("Bearer {key}"),
            Credential::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(..)"),
            Credential::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}

impl From<AccessToken> for Credential {
    fn from(token: AccessToken) -> Self {
        Credential::Bearer(token.secret().to_string())
    }
}
