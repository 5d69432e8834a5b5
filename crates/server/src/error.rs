use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use devmate_auth::AuthError;
use devmate_config::ConfigError;
use devmate_core::{ErrorBody, ValidationError};
use devmate_provider::ProviderError;

/// Wire-level error kinds of the chat API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Cors,
    Config,
    RateLimit,
    Auth,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Cors => "CORS_ERROR",
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::Auth => "AUTH_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Cors => StatusCode::FORBIDDEN,
            ErrorKind::Config | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Settings whose absence shows up in configuration error messages.
const CONFIG_NAMES: [&str; 3] = ["OPENAI_API_KEY", "CLIENT_ID", "CLIENT_SECRET"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cors_rejected() -> Self {
        Self::new(ErrorKind::Cors, "Origin not allowed")
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrorKind::RateLimit, "Rate limit exceeded")
    }

    pub fn auth_failed() -> Self {
        Self::new(ErrorKind::Auth, "Authentication failed")
    }

    pub fn internal() -> Self {
        Self::new(ErrorKind::Internal, "Internal server error")
    }

    /// Maps a failure from client creation or the upstream call onto the
    /// error taxonomy. Typed errors are matched first; the message patterns
    /// only catch errors that lost their type on the way.
    pub fn from_upstream(err: &anyhow::Error) -> Self {
        if let Some(config) = err.downcast_ref::<ConfigError>() {
            return Self::new(ErrorKind::Config, config.to_string());
        }
        if let Some(provider) = err.downcast_ref::<ProviderError>() {
            if matches!(provider, ProviderError::RateLimited { .. }) {
                return Self::rate_limited();
            }
            if provider.is_auth_failure() {
                return Self::auth_failed();
            }
        }
        if err.downcast_ref::<AuthError>().is_some() {
            return Self::auth_failed();
        }

        let message = err.to_string();
        if CONFIG_NAMES.iter().any(|name| message.contains(name)) {
            return Self::new(ErrorKind::Config, message);
        }
        if message.to_lowercase().contains("rate limit") {
            return Self::rate_limited();
        }
        if message.contains("authentication") || message.contains("Failed to authenticate") {
            return Self::auth_failed();
        }
        Self::internal()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::new(ErrorKind::Validation, err.to_string())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind.as_str().to_string(),
            message: self.message,
        };
        (self.kind.status(), Json(body)).into_response()
    }
}
