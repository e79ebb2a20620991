//! Local token endpoint and manager builders shared by unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use common::Secret;
use sheets_auth::{
    CredentialRecord, CredentialStore, MemoryCredentialStore, OAuthClient, OAuthClientConfig,
    Provider, now_millis,
};
use tokio::net::TcpListener;

use crate::CredentialManager;

pub(crate) struct MockTokenServer {
    pub url: String,
    calls: Arc<AtomicUsize>,
}

impl MockTokenServer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Token endpoint answering every POST with `status` + `body` after `delay`.
pub(crate) async fn start_token_server(
    status: StatusCode,
    body: serde_json::Value,
    delay: Duration,
) -> MockTokenServer {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let app = Router::new().route(
        "/token",
        post(move || {
            let counter = counter.clone();
            let body = body.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                (status, axum::Json(body))
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    MockTokenServer {
        url: format!("http://{addr}/token"),
        calls,
    }
}

pub(crate) fn google_manager(token_url: &str, store: Arc<dyn CredentialStore>) -> CredentialManager {
    let mut config = OAuthClientConfig::google(
        "client-id".into(),
        Secret::from("client-secret"),
        "http://localhost/oauth/google/callback".into(),
    );
    config.token_url = token_url.to_string();
    CredentialManager::new(OAuthClient::new(reqwest::Client::new(), config), store)
}

pub(crate) fn record(
    subject: &str,
    access: &str,
    refresh: Option<&str>,
    expires_in_secs: i64,
) -> CredentialRecord {
    let now = now_millis() as i64;
    CredentialRecord {
        provider: Provider::Google,
        subject_id: subject.to_string(),
        access_token: access.to_string(),
        refresh_token: refresh.map(String::from),
        expires_at: (now + expires_in_secs * 1000) as u64,
        scope: String::new(),
    }
}

pub(crate) async fn store_with(records: Vec<CredentialRecord>) -> Arc<MemoryCredentialStore> {
    let store = Arc::new(MemoryCredentialStore::new());
    for r in records {
        store.upsert(r).await.unwrap();
    }
    store
}
