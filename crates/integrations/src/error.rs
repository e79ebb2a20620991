//! Error types for downstream API calls

/// Failure of one authenticated downstream call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No valid token could be produced for the subject.
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] credential_manager::Error),

    /// The downstream API rejected the token even after a forced refresh.
    #[error("downstream rejected credentials: {0}")]
    Unauthorized(String),

    /// Non-auth failure: non-2xx status, transport error, timeout, or an
    /// unexpected response shape. `status` is `None` when no response came
    /// back.
    #[error("upstream error: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("invalid input: {0}")]
    Validation(String),
}

impl Error {
    pub(crate) fn shape(integration: &str, what: &str) -> Self {
        Error::Upstream {
            status: None,
            message: format!("{integration} response missing {what}"),
        }
    }
}

/// Result alias for integration calls.
pub type Result<T> = std::result::Result<T, Error>;
