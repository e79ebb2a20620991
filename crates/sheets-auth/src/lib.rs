//! OAuth plumbing for Google and Monday.com
//!
//! Consent URL construction, authorization code exchange, refresh token
//! exchange, and credential record storage. No policy lives here: deciding
//! when to refresh, and what a failed refresh means for the caller, is the
//! credential manager's job.
//!
//! Credential flow:
//! 1. Service calls `pkce::generate_state()` / `pkce::generate_verifier()`
//! 2. User consents via `OAuthClient::authorization_url()`
//! 3. Service calls `OAuthClient::exchange_code()` with the callback code
//! 4. Record stored via `CredentialStore::upsert()`
//! 5. `OAuthClient::refresh()` mints new access tokens as they expire
//! 6. `CredentialRecord::apply_token_response()` keeps the refresh token

pub mod constants;
pub mod credentials;
pub mod error;
pub mod pkce;
pub mod provider;
pub mod token;

pub use constants::*;
pub use credentials::{
    CredentialRecord, CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreFuture,
    now_millis,
};
pub use error::{Error, Result};
pub use pkce::{compute_challenge, generate_state, generate_verifier};
pub use provider::Provider;
pub use token::{OAuthClient, OAuthClientConfig, TokenResponse};
