//! Error types for credential manager operations

use sheets_auth::Provider;

/// Why a valid access token could not be produced.
///
/// `NotConnected` and `ReauthRequired` both end in a consent prompt but are
/// kept apart: the first means the user never connected, the second that a
/// grant on file is no longer usable.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("no {provider} credential on file for subject {subject_id}")]
    NotConnected {
        provider: Provider,
        subject_id: String,
    },

    #[error("{provider} grant for subject {subject_id} needs re-consent: {reason}")]
    ReauthRequired {
        provider: Provider,
        subject_id: String,
        reason: String,
    },

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// `rejected` is set when the provider refused the code itself
    /// (4xx, e.g. `invalid_grant`), as opposed to being unreachable.
    #[error("authorization code exchange failed: {message}")]
    CodeExchange { message: String, rejected: bool },

    #[error("credential store error: {0}")]
    Store(String),
}

impl From<sheets_auth::Error> for Error {
    fn from(e: sheets_auth::Error) -> Self {
        Error::Store(e.to_string())
    }
}

/// Result alias for credential manager operations.
pub type Result<T> = std::result::Result<T, Error>;
