//! Error types for OAuth and credential storage operations

/// Errors from OAuth token endpoint calls and the credential store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Non-2xx from a token endpoint. `code` and `description` are the
    /// provider's `error` / `error_description` fields verbatim.
    #[error("provider rejected token request ({status}): {code}: {description}")]
    Provider {
        status: u16,
        code: String,
        description: String,
    },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// The refresh token (or authorization code) was revoked, expired, or
    /// never valid. Only a new consent flow recovers from this.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Error::Provider { code, .. } if code == "invalid_grant")
    }

    /// The provider answered with a 4xx, so repeating the same request
    /// cannot succeed. Transport failures and 5xx responses are not.
    pub fn is_rejection(&self) -> bool {
        self.is_invalid_grant()
            || matches!(self, Error::Provider { status, .. } if (400..500).contains(status))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
