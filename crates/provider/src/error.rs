const MAX_BODY_CHARS: usize = 200;

/// Best human-readable message in an upstream error body.
fn upstream_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let found = ["/error/message", "/message", "/error"]
            .iter()
            .find_map(|pointer| value.pointer(pointer)?.as_str());
        if let Some(message) = found {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_BODY_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Failure reported by the completion API.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{status}: {}", upstream_message(body))]
    Rejected { status: u16, body: String },

    #[error("upstream unavailable ({status}): {}", upstream_message(body))]
    Unavailable { status: u16, body: String },

    #[error("Rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("upstream stream failed: {0}")]
    Stream(String),
}

impl ProviderError {
    /// Classifies a non-success response. `retry_after` is the raw
    /// `Retry-After` header in seconds.
    pub fn from_status(status: u16, body: String, retry_after: Option<&str>) -> Self {
        match status {
            429 => Self::RateLimited {
                retry_after_ms: retry_after
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .map_or(1000, |secs| secs.saturating_mul(1000)),
            },
            500.. => Self::Unavailable { status, body },
            _ => Self::Rejected { status, body },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } | Self::Unavailable { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Stream(_) => None,
        }
    }

    /// The provider refused our credentials.
    pub fn is_auth_failure(&self) -> bool {
        self.status() == Some(401)
    }
}
