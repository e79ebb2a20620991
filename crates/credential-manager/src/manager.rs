//! Valid-access-token orchestration for one provider
//!
//! The store is the single source of truth for tokens; the manager reads it
//! on every call and only touches the token endpoint when the cached expiry
//! says so (or a downstream 401 says the cache is wrong).
//!
//! Refreshes are single-flight per subject. Both the expiry path and the
//! forced path re-read the record after taking the subject guard, so a
//! caller that waited behind another caller's refresh returns that result
//! instead of refreshing a second time.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sheets_auth::{CredentialRecord, CredentialStore, OAuthClient, Provider, now_millis};
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::guard::SubjectLocks;

/// Connection status for one subject, safe to return to the UI (no tokens).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub provider: Provider,
    pub subject_id: String,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    pub expired: bool,
    pub has_refresh_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ConnectionStatus {
    fn from_record(record: &CredentialRecord, now: u64, skew: Duration) -> Self {
        Self {
            provider: record.provider,
            subject_id: record.subject_id.clone(),
            connected: true,
            expires_at: Some(record.expires_at),
            expired: record.is_expired(now, skew),
            has_refresh_token: record.has_refresh_token(),
            scope: Some(record.scope.clone()).filter(|s| !s.is_empty()),
        }
    }

    fn disconnected(provider: Provider, subject_id: &str) -> Self {
        Self {
            provider,
            subject_id: subject_id.to_string(),
            connected: false,
            expires_at: None,
            expired: false,
            has_refresh_token: false,
            scope: None,
        }
    }
}

/// Produces currently-valid access tokens for one provider's subjects.
pub struct CredentialManager {
    oauth: OAuthClient,
    store: Arc<dyn CredentialStore>,
    locks: SubjectLocks,
    expiry_skew: Duration,
}

impl CredentialManager {
    /// Manager with exact expiry comparison (no skew).
    pub fn new(oauth: OAuthClient, store: Arc<dyn CredentialStore>) -> Self {
        info!(provider = %oauth.provider(), "credential manager initialized");
        Self {
            oauth,
            store,
            locks: SubjectLocks::default(),
            expiry_skew: Duration::ZERO,
        }
    }

    /// Treat tokens expiring within `skew` as already expired.
    pub fn with_expiry_skew(mut self, skew: Duration) -> Self {
        self.expiry_skew = skew;
        self
    }

    pub fn provider(&self) -> Provider {
        self.oauth.provider()
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    /// Return a valid access token for `subject_id`, refreshing if the
    /// stored one has expired.
    ///
    /// Fails with `NotConnected` when no record exists, `ReauthRequired`
    /// when the token expired and there is no usable refresh token (or the
    /// provider rejected it as `invalid_grant`), and `RefreshFailed` for
    /// any other refresh failure. A failed refresh is not retried here.
    #[instrument(skip(self), fields(provider = %self.provider()))]
    pub async fn get_valid_access_token(&self, subject_id: &str) -> Result<String> {
        validate_subject(subject_id)?;

        let record = self.load(subject_id).await?;
        if !record.is_expired(now_millis(), self.expiry_skew) {
            return Ok(record.access_token);
        }

        let _guard = self.locks.acquire(subject_id).await;
        let record = self.load(subject_id).await?;
        if !record.is_expired(now_millis(), self.expiry_skew) {
            debug!("token refreshed by a concurrent caller");
            return Ok(record.access_token);
        }

        debug!("access token expired, refreshing");
        self.refresh_locked(record).await
    }

    /// Refresh regardless of the cached expiry, after `rejected_token` was
    /// refused downstream.
    ///
    /// If the stored token is no longer `rejected_token`, another caller
    /// already replaced it and the stored token is returned as is.
    #[instrument(skip(self, rejected_token), fields(provider = %self.provider()))]
    pub async fn force_refresh(&self, subject_id: &str, rejected_token: &str) -> Result<String> {
        validate_subject(subject_id)?;

        let _guard = self.locks.acquire(subject_id).await;
        let record = self.load(subject_id).await?;
        if record.access_token != rejected_token
            && !record.is_expired(now_millis(), self.expiry_skew)
        {
            debug!("rejected token already replaced by a concurrent refresh");
            return Ok(record.access_token);
        }

        info!("forcing token refresh after downstream rejection");
        self.refresh_locked(record).await
    }

    /// Refresh `subject_id` if its token expires within `threshold` and a
    /// refresh token is on file. Returns whether a refresh happened.
    pub async fn refresh_if_expiring(&self, subject_id: &str, threshold: Duration) -> Result<bool> {
        let _guard = self.locks.acquire(subject_id).await;
        let Some(record) = self.store.get(self.provider(), subject_id).await? else {
            return Ok(false);
        };
        if !record.is_expired(now_millis(), threshold) || !record.has_refresh_token() {
            return Ok(false);
        }
        self.refresh_locked(record).await.map(|_| true)
    }

    /// Complete a consent flow: exchange `code` and persist the grant.
    ///
    /// Re-consent over an existing record keeps its refresh token when the
    /// provider does not issue a new one.
    #[instrument(skip(self, code, verifier), fields(provider = %self.provider()))]
    pub async fn connect(
        &self,
        subject_id: &str,
        code: &str,
        verifier: Option<&str>,
    ) -> Result<ConnectionStatus> {
        validate_subject(subject_id)?;
        if code.trim().is_empty() {
            return Err(Error::Validation("authorization code is required".into()));
        }

        let token = self
            .oauth
            .exchange_code(code, verifier)
            .await
            .map_err(|e| Error::CodeExchange {
                rejected: e.is_rejection(),
                message: e.to_string(),
            })?;

        let _guard = self.locks.acquire(subject_id).await;
        let now = now_millis();
        let lifetime = self.oauth.config().default_token_lifetime;
        let record = match self.store.get(self.provider(), subject_id).await? {
            Some(mut existing) => {
                existing.apply_token_response(token, now, lifetime);
                existing
            }
            None => CredentialRecord::from_token_response(
                self.provider(),
                subject_id,
                token,
                now,
                lifetime,
            ),
        };

        if !record.has_refresh_token() {
            warn!("provider issued no refresh token; grant ends at access token expiry");
        }

        let status = ConnectionStatus::from_record(&record, now, self.expiry_skew);
        self.store.upsert(record).await?;
        info!("subject connected");
        Ok(status)
    }

    /// Forget the subject's grant. Returns whether a record existed.
    #[instrument(skip(self), fields(provider = %self.provider()))]
    pub async fn disconnect(&self, subject_id: &str) -> Result<bool> {
        validate_subject(subject_id)?;
        let _guard = self.locks.acquire(subject_id).await;
        let removed = self.store.remove(self.provider(), subject_id).await?;
        info!(removed = removed.is_some(), "subject disconnected");
        Ok(removed.is_some())
    }

    pub async fn status(&self, subject_id: &str) -> Result<ConnectionStatus> {
        validate_subject(subject_id)?;
        Ok(match self.store.get(self.provider(), subject_id).await? {
            Some(record) => {
                ConnectionStatus::from_record(&record, now_millis(), self.expiry_skew)
            }
            None => ConnectionStatus::disconnected(self.provider(), subject_id),
        })
    }

    /// Subject ids with a record on file for this provider.
    pub async fn subjects(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list(self.provider())
            .await?
            .into_iter()
            .map(|r| r.subject_id)
            .collect())
    }

    async fn load(&self, subject_id: &str) -> Result<CredentialRecord> {
        self.store
            .get(self.provider(), subject_id)
            .await?
            .ok_or_else(|| Error::NotConnected {
                provider: self.provider(),
                subject_id: subject_id.to_string(),
            })
    }

    /// Call the token endpoint for `record` and persist the result. Caller
    /// holds the subject guard.
    async fn refresh_locked(&self, mut record: CredentialRecord) -> Result<String> {
        let provider = self.provider();
        let Some(refresh_token) = record.refresh_token.clone().filter(|r| !r.is_empty()) else {
            warn!(subject_id = %record.subject_id, "token expired and no refresh token on file");
            record_refresh(provider, "reauth_required");
            return Err(Error::ReauthRequired {
                provider,
                subject_id: record.subject_id,
                reason: "no refresh token on file".into(),
            });
        };

        let requested_at = now_millis();
        match self.oauth.refresh(&refresh_token).await {
            Ok(token) => {
                let lifetime = self.oauth.config().default_token_lifetime;
                record.apply_token_response(token, requested_at, lifetime);
                let access_token = record.access_token.clone();
                let subject_id = record.subject_id.clone();
                let expires_at = record.expires_at;
                self.store.upsert(record).await?;
                record_refresh(provider, "success");
                info!(subject_id, expires_at, "token refresh succeeded");
                Ok(access_token)
            }
            Err(e) if e.is_invalid_grant() => {
                warn!(subject_id = %record.subject_id, error = %e, "refresh token rejected");
                record_refresh(provider, "reauth_required");
                Err(Error::ReauthRequired {
                    provider,
                    subject_id: record.subject_id,
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                warn!(subject_id = %record.subject_id, error = %e, "token refresh failed");
                record_refresh(provider, "failure");
                Err(Error::RefreshFailed(e.to_string()))
            }
        }
    }
}

fn validate_subject(subject_id: &str) -> Result<()> {
    if subject_id.trim().is_empty() {
        return Err(Error::Validation("subject_id is required".into()));
    }
    Ok(())
}

fn record_refresh(provider: Provider, outcome: &'static str) {
    metrics::counter!(
        "oh_sheets_token_refresh_total",
        "provider" => provider.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}
