//! HTTP error mapping
//!
//! Every handler failure becomes `{error, code}` JSON with a status that
//! tells the UI what to do next: 400 fix the input (or restart consent when
//! the provider refused the authorization code), 401 (re)connect the
//! account, 403 the provider refuses this grant, 502 try again later.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Credentials(#[from] credential_manager::Error),

    #[error(transparent)]
    Integration(#[from] integrations::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<sheets_auth::Error> for ApiError {
    fn from(e: sheets_auth::Error) -> Self {
        match e {
            sheets_auth::Error::UnknownProvider(_) => ApiError::Validation(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::Credentials(e) => credentials_status(e),
            ApiError::Integration(e) => match e {
                integrations::Error::Unauthenticated(inner) => credentials_status(inner),
                integrations::Error::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
                integrations::Error::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
                integrations::Error::Validation(_) => {
                    (StatusCode::BAD_REQUEST, "validation_error")
                }
            },
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

fn credentials_status(e: &credential_manager::Error) -> (StatusCode, &'static str) {
    use credential_manager::Error;
    match e {
        Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        Error::NotConnected { .. } => (StatusCode::UNAUTHORIZED, "not_connected"),
        Error::ReauthRequired { .. } => (StatusCode::UNAUTHORIZED, "reauth_required"),
        Error::RefreshFailed(_) => (StatusCode::BAD_GATEWAY, "refresh_failed"),
        Error::CodeExchange { rejected: true, .. } => (StatusCode::BAD_REQUEST, "code_rejected"),
        Error::CodeExchange { rejected: false, .. } => {
            (StatusCode::BAD_GATEWAY, "code_exchange_failed")
        }
        Error::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.to_string();
        if status.is_server_error() {
            error!(%status, code, error = %message, "request failed");
        } else {
            warn!(%status, code, error = %message, "request rejected");
        }
        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}
