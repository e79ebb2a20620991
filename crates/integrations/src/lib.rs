//! Authenticated Google Sheets and Monday.com API calls
//!
//! Every call goes through `ApiCaller`, which asks the credential manager
//! for a valid token and recovers from a single downstream 401 by forcing
//! one refresh. List operations return `SelectOption`s.

pub mod caller;
pub mod error;
pub mod google;
pub mod monday;
pub mod options;
#[cfg(test)]
mod test_support;

pub use caller::{ApiCaller, ApiRequest, AuthScheme};
pub use error::{Error, Result};
pub use google::{AppendResult, GoogleApi, GoogleEndpoints};
pub use monday::{ExecutionContext, MONDAY_API_VERSION, MondayApi};
pub use options::SelectOption;
