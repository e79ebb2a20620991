//! OAuth and API endpoints for Google and Monday.com
//!
//! These are the production defaults. Every URL is overridable from the
//! service config so tests and staging can point at other hosts.

/// Google consent screen
pub const GOOGLE_AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google token endpoint for code exchange and refresh
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Read/write access to spreadsheet contents
pub const GOOGLE_SCOPE_SPREADSHEETS: &str = "https://www.googleapis.com/auth/spreadsheets";

/// List the user's spreadsheet files without reading file contents
pub const GOOGLE_SCOPE_DRIVE_METADATA: &str =
    "https://www.googleapis.com/auth/drive.metadata.readonly";

pub const GOOGLE_DRIVE_API: &str = "https://www.googleapis.com/drive/v3";

pub const GOOGLE_SHEETS_API: &str = "https://sheets.googleapis.com/v4";

/// Monday.com consent screen
pub const MONDAY_AUTHORIZE_ENDPOINT: &str = "https://auth.monday.com/oauth2/authorize";

/// Monday.com token endpoint
pub const MONDAY_TOKEN_ENDPOINT: &str = "https://auth.monday.com/oauth2/token";

pub const MONDAY_SCOPES: &[&str] = &["me:read", "boards:read", "boards:write"];

/// Monday.com GraphQL endpoint
pub const MONDAY_API: &str = "https://api.monday.com/v2";

/// Monday.com access tokens carry no `expires_in`. Records still need an
/// absolute expiry, so they get this lifetime (one year) unless configured.
pub const MONDAY_DEFAULT_TOKEN_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

/// Fallback for Google responses missing `expires_in`; Google issues
/// one-hour access tokens.
pub const GOOGLE_DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
