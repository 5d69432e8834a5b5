/// Every way gateway authentication can fail. All variants are
/// authentication failures from the caller's point of view.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token generation failed: {status} {body}")]
    TokenRejected { status: u16, body: String },

    #[error("Authentication failed: {0}")]
    Transport(String),

    #[error("Authentication failed: invalid token response: {0}")]
    InvalidResponse(String),
}

impl AuthError {
    /// Upstream HTTP status, when the token endpoint answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TokenRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}
