//! Authenticated downstream calls with one-shot 401 recovery
//!
//! `ApiCaller` fetches a valid token from the credential manager, attaches
//! it, and performs the request. A 401 means the token was revoked or
//! rotated out from under us: the caller forces one refresh and retries
//! once. A second 401 is final.

use std::sync::Arc;

use credential_manager::CredentialManager;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How the access token is placed in the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>` (Google)
    Bearer,
    /// `Authorization: <token>` (Monday.com)
    Raw,
}

/// One downstream request, replayable for the post-refresh retry.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

enum Attempt {
    Done(Value),
    Rejected(String),
}

/// Performs downstream calls on behalf of subjects of one provider.
pub struct ApiCaller {
    http: reqwest::Client,
    manager: Arc<CredentialManager>,
    scheme: AuthScheme,
    integration: &'static str,
}

impl ApiCaller {
    /// `integration` labels logs and the upstream call counter.
    pub fn new(
        http: reqwest::Client,
        manager: Arc<CredentialManager>,
        scheme: AuthScheme,
        integration: &'static str,
    ) -> Self {
        Self {
            http,
            manager,
            scheme,
            integration,
        }
    }

    pub fn manager(&self) -> &Arc<CredentialManager> {
        &self.manager
    }

    /// Call the API as `subject_id`, recovering from one 401.
    pub async fn call(&self, subject_id: &str, request: &ApiRequest) -> Result<Value> {
        let token = self.manager.get_valid_access_token(subject_id).await?;
        let body = match self.send(&token, request).await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Rejected(body) => body,
        };

        debug!(
            integration = self.integration,
            subject_id,
            body = %truncate(&body),
            "downstream returned 401, forcing refresh"
        );
        let token = self.manager.force_refresh(subject_id, &token).await?;
        match self.send(&token, request).await? {
            Attempt::Done(value) => Ok(value),
            Attempt::Rejected(body) => {
                warn!(
                    integration = self.integration,
                    subject_id, "downstream rejected refreshed token"
                );
                record_call(self.integration, "unauthorized");
                Err(Error::Unauthorized(format!(
                    "{} returned 401 after refresh: {}",
                    self.integration,
                    truncate(&body)
                )))
            }
        }
    }

    /// Call the API with a fixed token that cannot be refreshed (platform
    /// tokens supplied by an embedding host). A 401 is final.
    pub async fn call_with_token(&self, token: &str, request: &ApiRequest) -> Result<Value> {
        match self.send(token, request).await? {
            Attempt::Done(value) => Ok(value),
            Attempt::Rejected(body) => {
                record_call(self.integration, "unauthorized");
                Err(Error::Unauthorized(format!(
                    "{} rejected platform token: {}",
                    self.integration,
                    truncate(&body)
                )))
            }
        }
    }

    async fn send(&self, token: &str, request: &ApiRequest) -> Result<Attempt> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .query(&request.query);
        builder = match self.scheme {
            AuthScheme::Bearer => builder.bearer_auth(token),
            AuthScheme::Raw => builder.header(AUTHORIZATION, token),
        };
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                let outcome = if e.is_timeout() { "timeout" } else { "transport_error" };
                warn!(integration = self.integration, error = %e, outcome, "downstream request failed");
                record_call(self.integration, outcome);
                return Err(Error::Upstream {
                    status: None,
                    message: format!("{} request failed: {e}", self.integration),
                });
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            record_call(self.integration, "rejected");
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Ok(Attempt::Rejected(body));
        }
        if !status.is_success() {
            record_call(self.integration, "error");
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            warn!(integration = self.integration, %status, "downstream returned error status");
            return Err(Error::Upstream {
                status: Some(status.as_u16()),
                message: format!("{} returned {status}: {}", self.integration, truncate(&body)),
            });
        }

        let value = response.json::<Value>().await.map_err(|e| {
            record_call(self.integration, "error");
            Error::Upstream {
                status: Some(status.as_u16()),
                message: format!("{} returned unreadable body: {e}", self.integration),
            }
        })?;
        record_call(self.integration, "success");
        Ok(Attempt::Done(value))
    }
}

fn record_call(integration: &'static str, outcome: &'static str) {
    metrics::counter!(
        "oh_sheets_upstream_calls_total",
        "integration" => integration,
        "outcome" => outcome
    )
    .increment(1);
}

/// Keep error bodies short enough for logs and client messages.
fn truncate(body: &str) -> &str {
    const MAX: usize = 512;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
