//! OAuth token endpoint client
//!
//! Two token endpoint interactions, both a single form POST with no retry:
//! 1. Authorization code exchange (end of the consent flow)
//! 2. Refresh token exchange (request-time, forced-on-401, and background)
//!
//! Retrying is the caller's decision. A non-2xx response is returned as
//! `Error::Provider` with the provider's `error` / `error_description`
//! fields so the caller can tell a revoked grant from a transient failure.

use std::time::Duration;

use common::Secret;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{
    GOOGLE_AUTHORIZE_ENDPOINT, GOOGLE_DEFAULT_TOKEN_LIFETIME_SECS, GOOGLE_SCOPE_DRIVE_METADATA,
    GOOGLE_SCOPE_SPREADSHEETS, GOOGLE_TOKEN_ENDPOINT, MONDAY_AUTHORIZE_ENDPOINT,
    MONDAY_DEFAULT_TOKEN_LIFETIME_SECS, MONDAY_SCOPES, MONDAY_TOKEN_ENDPOINT,
};
use crate::error::{Error, Result};
use crate::pkce::compute_challenge;
use crate::provider::Provider;

/// Token endpoint response for both code exchange and refresh.
///
/// `expires_in` is a delta in seconds. Google omits `refresh_token` on
/// refresh and on repeat consent; Monday.com omits `expires_in` entirely.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Standard OAuth2 error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client registration and endpoints for one provider.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub provider: Provider,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    /// Lifetime assumed when a token response has no `expires_in`.
    pub default_token_lifetime: Duration,
}

impl OAuthClientConfig {
    /// Google registration with production endpoints and the Sheets + Drive
    /// metadata scopes.
    pub fn google(client_id: String, client_secret: Secret<String>, redirect_uri: String) -> Self {
        Self {
            provider: Provider::Google,
            client_id,
            client_secret,
            redirect_uri,
            authorize_url: GOOGLE_AUTHORIZE_ENDPOINT.to_string(),
            token_url: GOOGLE_TOKEN_ENDPOINT.to_string(),
            scopes: vec![
                GOOGLE_SCOPE_SPREADSHEETS.to_string(),
                GOOGLE_SCOPE_DRIVE_METADATA.to_string(),
            ],
            default_token_lifetime: Duration::from_secs(GOOGLE_DEFAULT_TOKEN_LIFETIME_SECS),
        }
    }

    /// Monday.com registration with production endpoints.
    pub fn monday(client_id: String, client_secret: Secret<String>, redirect_uri: String) -> Self {
        Self {
            provider: Provider::Monday,
            client_id,
            client_secret,
            redirect_uri,
            authorize_url: MONDAY_AUTHORIZE_ENDPOINT.to_string(),
            token_url: MONDAY_TOKEN_ENDPOINT.to_string(),
            scopes: MONDAY_SCOPES.iter().map(|s| s.to_string()).collect(),
            default_token_lifetime: Duration::from_secs(MONDAY_DEFAULT_TOKEN_LIFETIME_SECS),
        }
    }
}

/// Stateless token endpoint client for one provider.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthClientConfig,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, config: OAuthClientConfig) -> Self {
        Self { http, config }
    }

    pub fn provider(&self) -> Provider {
        self.config.provider
    }

    pub fn config(&self) -> &OAuthClientConfig {
        &self.config
    }

    /// Build the consent URL the user is redirected to.
    ///
    /// Google gets `access_type=offline` and `prompt=consent` so that a
    /// refresh token is issued even when the user consented before, plus
    /// the S256 challenge for `verifier` when one is given.
    pub fn authorization_url(&self, state: &str, verifier: Option<&str>) -> Result<String> {
        let scope = self.config.scopes.join(" ");
        let mut params: Vec<(&str, String)> = vec![
            ("client_id", self.config.client_id.clone()),
            ("redirect_uri", self.config.redirect_uri.clone()),
            ("response_type", "code".to_string()),
            ("scope", scope),
            ("state", state.to_string()),
        ];

        if self.config.provider == Provider::Google {
            params.push(("access_type", "offline".to_string()));
            params.push(("prompt", "consent".to_string()));
            params.push(("include_granted_scopes", "true".to_string()));
        }

        if let Some(verifier) = verifier.filter(|_| self.config.provider.supports_pkce()) {
            params.push(("code_challenge", compute_challenge(verifier)));
            params.push(("code_challenge_method", "S256".to_string()));
        }

        let url = Url::parse_with_params(&self.config.authorize_url, &params)
            .map_err(|e| Error::InvalidResponse(format!("invalid authorize_url: {e}")))?;
        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, verifier: Option<&str>) -> Result<TokenResponse> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose().as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        if let Some(verifier) = verifier.filter(|_| self.config.provider.supports_pkce()) {
            form.push(("code_verifier", verifier));
        }

        debug!(provider = %self.config.provider, "exchanging authorization code");
        self.post_token_form(&form, "code exchange").await
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose().as_str()),
        ];

        debug!(provider = %self.config.provider, "refreshing access token");
        self.post_token_form(&form, "token refresh").await
    }

    async fn post_token_form(&self, form: &[(&str, &str)], what: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("{what} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(provider_error(status.as_u16(), &body));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("{what}: {e}")))?;

        if token.access_token.is_empty() {
            return Err(Error::InvalidResponse(format!(
                "{what}: empty access_token"
            )));
        }
        Ok(token)
    }
}

/// Map a non-2xx token endpoint response to `Error::Provider`.
///
/// Bodies that are not an RFC 6749 error object keep the raw body as the
/// description under a synthetic `http_<status>` code.
fn provider_error(status: u16, body: &str) -> Error {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(parsed) => Error::Provider {
            status,
            code: parsed.error,
            description: parsed.error_description.unwrap_or_default(),
        },
        Err(_) => Error::Provider {
            status,
            code: format!("http_{status}"),
            description: body.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type SeenForms = Arc<Mutex<Vec<HashMap<String, String>>>>;

    /// Local token endpoint that records each form and answers with a fixed
    /// status and body.
    async fn start_token_server(status: StatusCode, body: &'static str) -> (String, SeenForms) {
        let seen: SeenForms = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let app = Router::new().route(
            "/token",
            post(
                move |axum::Form(form): axum::Form<HashMap<String, String>>| {
                    let recorded = recorded.clone();
                    async move {
                        recorded.lock().unwrap().push(form);
                        (
                            status,
                            [(axum::http::header::CONTENT_TYPE, "application/json")],
                            body,
                        )
                    }
                },
            ),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/token"), seen)
    }

    fn google_client(token_url: &str) -> OAuthClient {
        let mut config = OAuthClientConfig::google(
            "client-123".into(),
            Secret::from("secret-456"),
            "https://ohsheets.example/oauth/google/callback".into(),
        );
        config.token_url = token_url.to_string();
        OAuthClient::new(reqwest::Client::new(), config)
    }

    #[test]
    fn token_response_without_refresh_token_deserializes() {
        let json = r#"{"access_token":"a2","expires_in":3600,"scope":"s","token_type":"Bearer"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "a2");
        assert_eq!(token.refresh_token, None);
        assert_eq!(token.expires_in, Some(3600));
    }

    #[test]
    fn monday_token_response_without_expiry_deserializes() {
        let json = r#"{"access_token":"m1","token_type":"Bearer","scope":"boards:read"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.expires_in, None);
        assert_eq!(token.scope.as_deref(), Some("boards:read"));
    }

    #[test]
    fn provider_error_parses_oauth_error_body() {
        let err = provider_error(
            400,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        );
        match err {
            Error::Provider {
                status,
                code,
                description,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "invalid_grant");
                assert_eq!(description, "Token has been expired or revoked.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn provider_error_keeps_unparseable_body() {
        let err = provider_error(503, "upstream unavailable");
        assert!(!err.is_invalid_grant());
        let msg = err.to_string();
        assert!(msg.contains("http_503"), "got: {msg}");
        assert!(msg.contains("upstream unavailable"), "got: {msg}");
    }

    #[test]
    fn google_authorization_url_requests_offline_access_with_pkce() {
        let client = google_client(GOOGLE_TOKEN_ENDPOINT);
        let url = client
            .authorization_url("state-abc", Some("verifier-xyz"))
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with(GOOGLE_AUTHORIZE_ENDPOINT));
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["state"], "state-abc");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["code_challenge"], compute_challenge("verifier-xyz"));
        assert_eq!(params["code_challenge_method"], "S256");
        assert!(params["scope"].contains(GOOGLE_SCOPE_SPREADSHEETS));
        assert!(params["scope"].contains(GOOGLE_SCOPE_DRIVE_METADATA));
    }

    #[test]
    fn monday_authorization_url_has_no_pkce_or_offline_params() {
        let client = OAuthClient::new(
            reqwest::Client::new(),
            OAuthClientConfig::monday(
                "monday-client".into(),
                Secret::from("s"),
                "https://ohsheets.example/oauth/monday/callback".into(),
            ),
        );
        let url = client.authorization_url("st", Some("ignored")).unwrap();
        assert!(url.starts_with(MONDAY_AUTHORIZE_ENDPOINT));
        assert!(!url.contains("code_challenge"));
        assert!(!url.contains("access_type"));
        assert!(url.contains("state=st"));
    }

    #[tokio::test]
    async fn refresh_posts_refresh_token_grant() {
        let (url, seen) =
            start_token_server(StatusCode::OK, r#"{"access_token":"a2","expires_in":3600}"#).await;
        let client = google_client(&url);

        let token = client.refresh("r1").await.unwrap();
        assert_eq!(token.access_token, "a2");
        assert_eq!(token.expires_in, Some(3600));

        let forms = seen.lock().unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0]["grant_type"], "refresh_token");
        assert_eq!(forms[0]["refresh_token"], "r1");
        assert_eq!(forms[0]["client_id"], "client-123");
        assert_eq!(forms[0]["client_secret"], "secret-456");
    }

    #[tokio::test]
    async fn refresh_surfaces_invalid_grant_verbatim() {
        let (url, _seen) = start_token_server(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        )
        .await;
        let client = google_client(&url);

        let err = client.refresh("revoked").await.unwrap_err();
        assert!(err.is_invalid_grant(), "got: {err:?}");
        assert!(err.to_string().contains("Token has been expired or revoked."));
    }

    #[tokio::test]
    async fn exchange_code_sends_verifier_and_redirect_uri() {
        let (url, seen) = start_token_server(
            StatusCode::OK,
            r#"{"access_token":"a1","refresh_token":"r1","expires_in":3599}"#,
        )
        .await;
        let client = google_client(&url);

        let token = client.exchange_code("code-1", Some("verifier-1")).await.unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("r1"));

        let forms = seen.lock().unwrap();
        assert_eq!(forms[0]["grant_type"], "authorization_code");
        assert_eq!(forms[0]["code"], "code-1");
        assert_eq!(forms[0]["code_verifier"], "verifier-1");
        assert_eq!(
            forms[0]["redirect_uri"],
            "https://ohsheets.example/oauth/google/callback"
        );
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_is_http_error() {
        let client = google_client("http://127.0.0.1:1/token");
        let err = client.refresh("r1").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn empty_access_token_is_rejected() {
        let (url, _seen) =
            start_token_server(StatusCode::OK, r#"{"access_token":"","expires_in":3600}"#).await;
        let err = google_client(&url).refresh("r1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)), "got: {err:?}");
    }
}
