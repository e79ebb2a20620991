//! Credential lifecycle management for Oh Sheets
//!
//! Answers "give me a valid access token for subject X" for one provider:
//! reads the credential store, refreshes expired tokens through the
//! provider's token endpoint, and persists the result. Refreshes are
//! single-flight per subject.
//!
//! Lifecycle:
//! 1. `CredentialManager::connect` stores the grant after consent
//! 2. `get_valid_access_token` returns the cached token or refreshes it
//! 3. A downstream 401 triggers `force_refresh`
//! 4. `spawn_refresh_task` refreshes tokens ahead of expiry
//! 5. `disconnect` deletes the grant

pub mod error;
mod guard;
pub mod manager;
pub mod refresh;
#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use manager::{ConnectionStatus, CredentialManager};
pub use refresh::{RefreshReport, refresh_cycle, spawn_refresh_task};
