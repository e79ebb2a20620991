//! OAuth providers the service can hold credentials for

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Monday,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Monday => "monday",
        }
    }

    /// Whether the consent flow uses a PKCE challenge. Monday.com's
    /// authorization server ignores PKCE parameters.
    pub fn supports_pkce(&self) -> bool {
        matches!(self, Provider::Google)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(Provider::Google),
            "monday" => Ok(Provider::Monday),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}
