//! Credential records and the stores that hold them
//!
//! A record is one subject's grant for one provider. The `CredentialStore`
//! trait is the seam to whatever persists records; two implementations
//! ship here:
//!
//! - `FileCredentialStore`: a JSON file of all records. Writes go through a
//!   temp file + rename so a crash never leaves a torn file, and the file is
//!   0600 since it holds bearer tokens.
//! - `MemoryCredentialStore`: process-local, for ephemeral deployments and
//!   tests.
//!
//! Stores are last-writer-wins. Callers that read-then-write (refresh)
//! serialize per subject themselves.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::token::TokenResponse;

/// Boxed future returned by `CredentialStore` methods (keeps the trait
/// usable as `Arc<dyn CredentialStore>`).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One subject's OAuth grant for one provider.
///
/// `expires_at` is an absolute unix timestamp in milliseconds, computed
/// when the token response is stored. It is required: a record never holds
/// an access token without an expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub provider: Provider,
    pub subject_id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: u64,
    #[serde(default)]
    pub scope: String,
}

impl CredentialRecord {
    /// Build a record from a fresh token response.
    pub fn from_token_response(
        provider: Provider,
        subject_id: impl Into<String>,
        token: TokenResponse,
        now_millis: u64,
        default_lifetime: Duration,
    ) -> Self {
        let expires_at = expiry_from(&token, now_millis, default_lifetime);
        Self {
            provider,
            subject_id: subject_id.into(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            scope: token.scope.unwrap_or_default(),
        }
    }

    /// Apply a refresh (or re-consent) response in place.
    ///
    /// A response without `refresh_token` keeps the stored one; a response
    /// without `scope` keeps the stored scope.
    pub fn apply_token_response(
        &mut self,
        token: TokenResponse,
        now_millis: u64,
        default_lifetime: Duration,
    ) {
        self.expires_at = expiry_from(&token, now_millis, default_lifetime);
        self.access_token = token.access_token;
        if let Some(refresh) = token.refresh_token {
            self.refresh_token = Some(refresh);
        }
        if let Some(scope) = token.scope {
            self.scope = scope;
        }
    }

    /// Whether the access token is unusable at `now_millis`, treating
    /// tokens that expire within `skew` as already expired. A zero skew is
    /// an exact comparison.
    pub fn is_expired(&self, now_millis: u64, skew: Duration) -> bool {
        let skew_millis = skew.as_millis() as u64;
        self.expires_at <= now_millis.saturating_add(skew_millis)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|r| !r.is_empty())
    }
}

fn expiry_from(token: &TokenResponse, now_millis: u64, default_lifetime: Duration) -> u64 {
    let lifetime_secs = token.expires_in.unwrap_or(default_lifetime.as_secs());
    now_millis.saturating_add(lifetime_secs.saturating_mul(1000))
}

/// Persistence seam for credential records, keyed by (provider, subject).
pub trait CredentialStore: Send + Sync {
    fn get<'a>(
        &'a self,
        provider: Provider,
        subject_id: &'a str,
    ) -> StoreFuture<'a, Option<CredentialRecord>>;

    /// Insert or replace the record for `(record.provider, record.subject_id)`.
    fn upsert(&self, record: CredentialRecord) -> StoreFuture<'_, ()>;

    /// Delete a record, returning it if it existed.
    fn remove<'a>(
        &'a self,
        provider: Provider,
        subject_id: &'a str,
    ) -> StoreFuture<'a, Option<CredentialRecord>>;

    /// All records for a provider.
    fn list(&self, provider: Provider) -> StoreFuture<'_, Vec<CredentialRecord>>;
}

fn store_key(provider: Provider, subject_id: &str) -> String {
    format!("{provider}:{subject_id}")
}

/// JSON-file-backed credential store.
///
/// The in-memory map mirrors the file. A mutation is written to disk first
/// and only applied to the map once the write succeeds, all while holding
/// the lock, so file order matches mutation order.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<HashMap<String, CredentialRecord>>,
}

impl FileCredentialStore {
    /// Load records from `path`, creating an empty file if none exists.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let records: HashMap<String, CredentialRecord> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), records = records.len(), "loaded credentials");
            records
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let records = HashMap::new();
            write_atomic(&path, &records).await?;
            records
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get<'a>(
        &'a self,
        provider: Provider,
        subject_id: &'a str,
    ) -> StoreFuture<'a, Option<CredentialRecord>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(&store_key(provider, subject_id)).cloned())
        })
    }

    fn upsert(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let key = store_key(record.provider, &record.subject_id);
            debug!(key, "upserting credential");
            let mut next = state.clone();
            next.insert(key, record);
            write_atomic(&self.path, &next).await?;
            *state = next;
            Ok(())
        })
    }

    fn remove<'a>(
        &'a self,
        provider: Provider,
        subject_id: &'a str,
    ) -> StoreFuture<'a, Option<CredentialRecord>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let key = store_key(provider, subject_id);
            if !state.contains_key(&key) {
                return Ok(None);
            }
            let mut next = state.clone();
            let removed = next.remove(&key);
            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(%provider, subject_id, "removed credential");
            Ok(removed)
        })
    }

    fn list(&self, provider: Provider) -> StoreFuture<'_, Vec<CredentialRecord>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .values()
                .filter(|r| r.provider == provider)
                .cloned()
                .collect())
        })
    }
}

/// Process-local credential store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<HashMap<String, CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get<'a>(
        &'a self,
        provider: Provider,
        subject_id: &'a str,
    ) -> StoreFuture<'a, Option<CredentialRecord>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .await
                .get(&store_key(provider, subject_id))
                .cloned())
        })
    }

    fn upsert(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let key = store_key(record.provider, &record.subject_id);
            self.state.lock().await.insert(key, record);
            Ok(())
        })
    }

    fn remove<'a>(
        &'a self,
        provider: Provider,
        subject_id: &'a str,
    ) -> StoreFuture<'a, Option<CredentialRecord>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .await
                .remove(&store_key(provider, subject_id)))
        })
    }

    fn list(&self, provider: Provider) -> StoreFuture<'_, Vec<CredentialRecord>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .await
                .values()
                .filter(|r| r.provider == provider)
                .cloned()
                .collect())
        })
    }
}

/// Write all records to `path` via a temp file in the same directory and a
/// rename, with 0600 permissions on unix.
async fn write_atomic(path: &Path, data: &HashMap<String, CredentialRecord>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
