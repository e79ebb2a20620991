//! OAuth connection endpoints
//!
//! Endpoints (`{provider}` is `google` or `monday`):
//! - POST /oauth/{provider}/start      - issue state (+ PKCE verifier), return consent URL
//! - GET|POST /oauth/{provider}/callback - exchange code, store credential
//! - POST /oauth/{provider}/status     - connection status, never tokens
//! - POST /oauth/{provider}/disconnect - delete stored credential

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use sheets_auth::{Provider, generate_state, generate_verifier};
use tracing::{info, warn};

use credential_manager::ConnectionStatus;

use crate::error::ApiError;
use crate::state::{AppState, PendingAuthorization};

#[derive(Debug, Deserialize)]
pub struct SubjectRequest {
    pub subject_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub state: String,
    pub code: String,
}

fn parse_provider(raw: &str) -> Result<Provider, ApiError> {
    Ok(raw.parse::<Provider>()?)
}

/// POST /oauth/{provider}/start
///
/// The verifier is only generated for providers that accept PKCE; it stays
/// server-side and is consumed by the callback.
pub async fn start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<SubjectRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let provider = parse_provider(&provider)?;
    let Json(body) = payload?;
    if body.subject_id.trim().is_empty() {
        return Err(ApiError::Validation("subject_id is required".into()));
    }
    let manager = state.manager(provider)?;

    let oauth_state = generate_state();
    let verifier = provider.supports_pkce().then(generate_verifier);
    let authorization_url = manager
        .oauth()
        .authorization_url(&oauth_state, verifier.as_deref())?;

    state
        .pending
        .insert(
            oauth_state.clone(),
            PendingAuthorization::new(provider, body.subject_id.clone(), verifier),
        )
        .await;
    info!(%provider, subject_id = body.subject_id, "consent flow started");

    Ok(Json(json!({
        "authorization_url": authorization_url,
        "state": oauth_state,
    })))
}

/// POST /oauth/{provider}/callback with a JSON body.
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<CallbackRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let provider = parse_provider(&provider)?;
    let Json(body) = payload?;
    complete(&state, provider, body).await
}

/// GET /oauth/{provider}/callback, the provider's browser redirect.
pub async fn callback_redirect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    query: Result<Query<CallbackRequest>, axum::extract::rejection::QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let provider = parse_provider(&provider)?;
    let Query(body) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    complete(&state, provider, body).await
}

async fn complete(
    state: &AppState,
    provider: Provider,
    body: CallbackRequest,
) -> Result<Json<Value>, ApiError> {
    let manager = state.manager(provider)?;
    let pending = state.pending.take(&body.state).await.ok_or_else(|| {
        ApiError::Validation("unknown or expired OAuth state, restart the connection".into())
    })?;
    if pending.provider != provider {
        warn!(%provider, expected = %pending.provider, "OAuth state used on the wrong provider");
        return Err(ApiError::Validation(format!(
            "OAuth state was issued for {}",
            pending.provider
        )));
    }

    let status = manager
        .connect(&pending.subject_id, &body.code, pending.verifier.as_deref())
        .await?;

    Ok(Json(json!({
        "subject_id": status.subject_id,
        "provider": provider,
        "status": "connected",
        "expires_at": status.expires_at,
        "has_refresh_token": status.has_refresh_token,
    })))
}

/// POST /oauth/{provider}/status
pub async fn status(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<SubjectRequest>, JsonRejection>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    let provider = parse_provider(&provider)?;
    let Json(body) = payload?;
    let status = state.manager(provider)?.status(&body.subject_id).await?;
    Ok(Json(status))
}

/// POST /oauth/{provider}/disconnect
pub async fn disconnect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    payload: Result<Json<SubjectRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let provider = parse_provider(&provider)?;
    let Json(body) = payload?;
    let removed = state.manager(provider)?.disconnect(&body.subject_id).await?;
    Ok(Json(json!({
        "subject_id": body.subject_id,
        "removed": removed,
    })))
}
