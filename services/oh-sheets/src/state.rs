//! Shared application state
//!
//! One credential manager per configured provider, the integration clients
//! built on top of them, pending OAuth authorizations, and request counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use credential_manager::CredentialManager;
use integrations::{ApiCaller, AuthScheme, GoogleApi, GoogleEndpoints, MondayApi};
use metrics_exporter_prometheus::PrometheusHandle;
use sheets_auth::{CredentialStore, OAuthClient, OAuthClientConfig, Provider};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::{Config, OAuthAppConfig};
use crate::error::ApiError;

/// Grace period for in-flight requests after a shutdown signal.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a consent flow may take between `start` and `callback`.
pub const PENDING_AUTH_TTL: Duration = Duration::from_secs(600);

/// Runtime counters surfaced by `/health`
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    /// Requests currently being handled; reported if the drain times out.
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// An in-progress consent flow, keyed by its `state` parameter.
#[derive(Debug)]
pub struct PendingAuthorization {
    pub provider: Provider,
    pub subject_id: String,
    pub verifier: Option<String>,
    created_at: Instant,
}

impl PendingAuthorization {
    pub fn new(provider: Provider, subject_id: String, verifier: Option<String>) -> Self {
        Self {
            provider,
            subject_id,
            verifier,
            created_at: Instant::now(),
        }
    }
}

/// In-memory store of pending consent flows. Entries are single-use and
/// expire after `PENDING_AUTH_TTL`.
#[derive(Clone, Default)]
pub struct PendingAuthorizations {
    inner: Arc<Mutex<HashMap<String, PendingAuthorization>>>,
}

impl PendingAuthorizations {
    pub async fn insert(&self, state: String, pending: PendingAuthorization) {
        let mut entries = self.inner.lock().await;
        // Lazy cleanup while holding the lock
        entries.retain(|_, p| p.created_at.elapsed() < PENDING_AUTH_TTL);
        entries.insert(state, pending);
    }

    /// Remove and return the flow for `state` unless it has expired.
    pub async fn take(&self, state: &str) -> Option<PendingAuthorization> {
        let pending = self.inner.lock().await.remove(state)?;
        (pending.created_at.elapsed() < PENDING_AUTH_TTL).then_some(pending)
    }

    #[cfg(test)]
    pub async fn insert_aged(&self, state: &str, mut pending: PendingAuthorization, age: Duration) {
        pending.created_at = Instant::now()
            .checked_sub(age)
            .unwrap_or_else(Instant::now);
        self.inner.lock().await.insert(state.to_string(), pending);
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    managers: Arc<HashMap<Provider, Arc<CredentialManager>>>,
    google: Option<Arc<GoogleApi>>,
    monday: Option<Arc<MondayApi>>,
    pub pending: PendingAuthorizations,
    pub metrics: ServiceMetrics,
    pub prometheus: PrometheusHandle,
}

impl AppState {
    /// Wire managers and integration clients for every configured provider.
    /// All of them share one HTTP client and one credential store.
    pub fn from_config(
        config: &Config,
        http: reqwest::Client,
        store: Arc<dyn CredentialStore>,
        prometheus: PrometheusHandle,
    ) -> common::Result<Self> {
        let skew = Duration::from_secs(config.credentials.expiry_skew_secs);
        let manager_for = |provider: Provider, app: &OAuthAppConfig| -> common::Result<_> {
            let oauth = OAuthClient::new(http.clone(), oauth_client_config(provider, app)?);
            Ok(Arc::new(
                CredentialManager::new(oauth, store.clone()).with_expiry_skew(skew),
            ))
        };

        let mut managers = HashMap::new();

        let google = match &config.google {
            Some(google) => {
                let manager = manager_for(Provider::Google, &google.oauth)?;
                managers.insert(Provider::Google, manager.clone());
                let defaults = GoogleEndpoints::default();
                let endpoints = GoogleEndpoints {
                    drive_api: google.drive_api.clone().unwrap_or(defaults.drive_api),
                    sheets_api: google.sheets_api.clone().unwrap_or(defaults.sheets_api),
                };
                let caller = ApiCaller::new(http.clone(), manager, AuthScheme::Bearer, "google");
                Some(Arc::new(GoogleApi::new(caller, endpoints)))
            }
            None => None,
        };

        let monday = match &config.monday {
            Some(monday) => {
                let manager = manager_for(Provider::Monday, &monday.oauth)?;
                managers.insert(Provider::Monday, manager.clone());
                let caller = ApiCaller::new(http.clone(), manager, AuthScheme::Raw, "monday");
                let mut api = MondayApi::new(caller, monday.api_url.clone(), monday.context);
                if let Some(token) = monday.api_token.clone() {
                    api = api.with_platform_token(token);
                }
                info!(context = ?monday.context, "monday integration configured");
                Some(Arc::new(api))
            }
            None => None,
        };

        Ok(Self {
            managers: Arc::new(managers),
            google,
            monday,
            pending: PendingAuthorizations::default(),
            metrics: ServiceMetrics::new(),
            prometheus,
        })
    }

    pub fn manager(&self, provider: Provider) -> Result<&Arc<CredentialManager>, ApiError> {
        self.managers
            .get(&provider)
            .ok_or_else(|| ApiError::Validation(format!("{provider} is not configured")))
    }

    /// Managers in a stable order, for the background refresh task and
    /// `/health`.
    pub fn managers(&self) -> Vec<Arc<CredentialManager>> {
        let mut managers: Vec<_> = self.managers.values().cloned().collect();
        managers.sort_by_key(|m| m.provider().as_str());
        managers
    }

    pub fn google(&self) -> Result<&GoogleApi, ApiError> {
        self.google
            .as_deref()
            .ok_or_else(|| ApiError::Validation("google is not configured".into()))
    }

    pub fn monday(&self) -> Result<&MondayApi, ApiError> {
        self.monday
            .as_deref()
            .ok_or_else(|| ApiError::Validation("monday is not configured".into()))
    }
}

fn oauth_client_config(provider: Provider, app: &OAuthAppConfig) -> common::Result<OAuthClientConfig> {
    let secret = app.client_secret.clone().ok_or_else(|| {
        common::Error::Config(format!("{provider} client secret was not resolved"))
    })?;
    let mut config = match provider {
        Provider::Google => {
            OAuthClientConfig::google(app.client_id.clone(), secret, app.redirect_uri.clone())
        }
        Provider::Monday => {
            OAuthClientConfig::monday(app.client_id.clone(), secret, app.redirect_uri.clone())
        }
    };
    if let Some(url) = &app.authorize_url {
        config.authorize_url = url.clone();
    }
    if let Some(url) = &app.token_url {
        config.token_url = url.clone();
    }
    if let Some(scopes) = &app.scopes {
        config.scopes = scopes.clone();
    }
    Ok(config)
}
