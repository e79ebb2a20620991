//! Local token endpoint and downstream API doubles shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use common::Secret;
use credential_manager::CredentialManager;
use serde_json::Value;
use sheets_auth::{
    CredentialRecord, CredentialStore, MemoryCredentialStore, OAuthClient, OAuthClientConfig,
    Provider, now_millis,
};
use tokio::net::TcpListener;

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub(crate) struct MockTokenServer {
    calls: Arc<AtomicUsize>,
}

impl MockTokenServer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Manager for `provider` with subject `u1` holding access token `a1`
/// (expiring in `expires_in_secs`) and refresh token `r1`. The token
/// endpoint answers every refresh with `status` + `body`.
pub(crate) async fn connected_manager(
    provider: Provider,
    status: StatusCode,
    body: Value,
    expires_in_secs: i64,
) -> (Arc<CredentialManager>, MockTokenServer) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let app = Router::new().route(
        "/token",
        post(move || {
            let counter = counter.clone();
            let body = body.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (status, axum::Json(body))
            }
        }),
    );
    let base = serve(app).await;

    let mut config = match provider {
        Provider::Google => OAuthClientConfig::google(
            "client-id".into(),
            Secret::from("client-secret"),
            "http://localhost/oauth/google/callback".into(),
        ),
        Provider::Monday => OAuthClientConfig::monday(
            "client-id".into(),
            Secret::from("client-secret"),
            "http://localhost/oauth/monday/callback".into(),
        ),
    };
    config.token_url = format!("{base}/token");

    let store = Arc::new(MemoryCredentialStore::new());
    store
        .upsert(CredentialRecord {
            provider,
            subject_id: "u1".into(),
            access_token: "a1".into(),
            refresh_token: Some("r1".into()),
            expires_at: (now_millis() as i64 + expires_in_secs * 1000) as u64,
            scope: String::new(),
        })
        .await
        .unwrap();

    let manager = CredentialManager::new(OAuthClient::new(reqwest::Client::new(), config), store);
    (Arc::new(manager), MockTokenServer { calls })
}

pub(crate) async fn manager_with_token_server(
    status: StatusCode,
    body: Value,
    expires_in_secs: i64,
) -> (Arc<CredentialManager>, MockTokenServer) {
    connected_manager(Provider::Google, status, body, expires_in_secs).await
}

/// What the downstream double saw.
#[derive(Debug, Clone)]
pub(crate) struct SeenRequest {
    pub method: String,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Downstream API behaviour.
#[derive(Clone)]
pub(crate) enum MockApi {
    /// 200 with `body` when `Authorization` equals the value, else 401.
    Accepting { authorization: String, body: Value },
    Status { status: StatusCode, body: Value },
    Slow(Duration),
}

impl MockApi {
    pub fn accepting(authorization: &str, body: Value) -> Self {
        MockApi::Accepting {
            authorization: authorization.to_string(),
            body,
        }
    }

    pub fn status(status: StatusCode, body: Value) -> Self {
        MockApi::Status { status, body }
    }

    pub fn slow(delay: Duration) -> Self {
        MockApi::Slow(delay)
    }
}

pub(crate) struct ApiServer {
    pub url: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl ApiServer {
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last(&self) -> SeenRequest {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

pub(crate) async fn start_api(behaviour: MockApi) -> ApiServer {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let app = Router::new().fallback(move |req: Request<Body>| {
        let log = log.clone();
        let behaviour = behaviour.clone();
        async move {
            let (parts, body) = req.into_parts();
            let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
            let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            let authorization = parts
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            log.lock().unwrap().push(SeenRequest {
                method: parts.method.to_string(),
                uri: parts.uri.to_string(),
                headers: parts.headers,
                body,
            });

            match behaviour {
                MockApi::Accepting {
                    authorization: expected,
                    body,
                } => {
                    if authorization.as_deref() == Some(expected.as_str()) {
                        (StatusCode::OK, axum::Json(body))
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            axum::Json(serde_json::json!({"error": "invalid token"})),
                        )
                    }
                }
                MockApi::Status { status, body } => (status, axum::Json(body)),
                MockApi::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    (StatusCode::OK, axum::Json(Value::Null))
                }
            }
        }
    });
    ApiServer {
        url: serve(app).await,
        seen,
    }
}
