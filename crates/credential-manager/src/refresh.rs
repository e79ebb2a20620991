//! Proactive background token refresh
//!
//! A scheduled task walks every stored subject and refreshes tokens that
//! are about to expire, so request-time refreshes are the exception. It
//! goes through `CredentialManager::refresh_if_expiring`, which takes the
//! same per-subject guard as the request path.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::manager::CredentialManager;

/// Outcome counts for one pass over a provider's subjects.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub skipped: usize,
    pub reauth_required: usize,
    pub failed: usize,
}

/// Spawn the background refresh loop.
///
/// Every `interval`, refreshes any token expiring within `threshold` for
/// each manager. The first tick is skipped (tokens were just loaded). The
/// loop exits when `cancel` fires.
pub fn spawn_refresh_task(
    managers: Vec<Arc<CredentialManager>>,
    interval: Duration,
    threshold: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        info!(
            interval_secs = interval.as_secs(),
            threshold_secs = threshold.as_secs(),
            "background token refresh started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("background token refresh stopped");
                    break;
                }
                _ = ticker.tick() => {
                    for manager in &managers {
                        let report = refresh_cycle(manager, threshold).await;
                        debug!(provider = %manager.provider(), ?report, "refresh cycle finished");
                    }
                }
            }
        }
    })
}

/// Run one pass over a manager's subjects.
///
/// Failures are logged and counted; the next cycle (or the request path)
/// tries again. A subject needing re-consent stays on file so the UI can
/// show the reconnect prompt.
pub async fn refresh_cycle(manager: &CredentialManager, threshold: Duration) -> RefreshReport {
    let mut report = RefreshReport::default();
    let subjects = match manager.subjects().await {
        Ok(s) => s,
        Err(e) => {
            warn!(provider = %manager.provider(), error = %e, "listing subjects for refresh failed");
            return report;
        }
    };

    for subject_id in &subjects {
        match manager.refresh_if_expiring(subject_id, threshold).await {
            Ok(true) => report.refreshed += 1,
            Ok(false) => report.skipped += 1,
            Err(Error::ReauthRequired { reason, .. }) => {
                warn!(subject_id, reason, "background refresh: subject needs re-consent");
                report.reauth_required += 1;
            }
            Err(e) => {
                warn!(subject_id, error = %e, "background refresh failed, will retry next cycle");
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{google_manager, record, start_token_server, store_with};
    use axum::http::StatusCode;
    use serde_json::json;
    use sheets_auth::{CredentialStore, Provider};

    #[tokio::test]
    async fn cycle_refreshes_only_expiring_tokens() {
        let server = start_token_server(
            StatusCode::OK,
            json!({"access_token": "a2", "expires_in": 3600}),
            Duration::ZERO,
        )
        .await;
        let store = store_with(vec![
            record("valid", "a1", Some("r1"), 4 * 3600),
            record("expiring", "a1", Some("r1"), 30),
            record("no-refresh", "a1", None, 30),
        ])
        .await;
        let manager = google_manager(&server.url, store.clone());

        let report = refresh_cycle(&manager, Duration::from_secs(900)).await;
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(server.calls(), 1);

        let refreshed = store.get(Provider::Google, "expiring").await.unwrap().unwrap();
        assert_eq!(refreshed.access_token, "a2");
        let untouched = store.get(Provider::Google, "valid").await.unwrap().unwrap();
        assert_eq!(untouched.access_token, "a1");
    }

    #[tokio::test]
    async fn cycle_counts_revoked_grants() {
        let server = start_token_server(
            StatusCode::BAD_REQUEST,
            json!({"error": "invalid_grant"}),
            Duration::ZERO,
        )
        .await;
        let store = store_with(vec![record("revoked", "a1", Some("r1"), 10)]).await;
        let manager = google_manager(&server.url, store.clone());

        let report = refresh_cycle(&manager, Duration::from_secs(900)).await;
        assert_eq!(report.reauth_required, 1);
        assert!(store.get(Provider::Google, "revoked").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cycle_counts_transient_failures() {
        let server = start_token_server(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": "internal_failure"}),
            Duration::ZERO,
        )
        .await;
        let store = store_with(vec![record("u1", "a1", Some("r1"), 10)]).await;
        let manager = google_manager(&server.url, store);

        let report = refresh_cycle(&manager, Duration::from_secs(900)).await;
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn task_stops_on_cancel() {
        let server = start_token_server(
            StatusCode::OK,
            json!({"access_token": "a2", "expires_in": 3600}),
            Duration::ZERO,
        )
        .await;
        let store = store_with(vec![]).await;
        let manager = Arc::new(google_manager(&server.url, store));
        let cancel = CancellationToken::new();

        let handle = spawn_refresh_task(
            vec![manager],
            Duration::from_millis(10),
            Duration::from_secs(60),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop after cancellation")
            .unwrap();
    }
}
