//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Client secrets and the Monday platform token are loaded from env vars
//! or `*_file` paths, never stored in the TOML directly.

use common::Secret;
use integrations::ExecutionContext;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub google: Option<GoogleConfig>,
    #[serde(default)]
    pub monday: Option<MondayConfig>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Outbound HTTP client settings
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

/// Credential store settings. Without `path`, credentials live in memory
/// and are lost on restart.
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Tokens expiring within this window count as expired.
    #[serde(default)]
    pub expiry_skew_secs: u64,
}

/// Background refresh settings
#[derive(Debug, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_refresh_threshold")]
    pub threshold_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_refresh_interval(),
            threshold_secs: default_refresh_threshold(),
        }
    }
}

/// OAuth client registration shared by both providers
#[derive(Debug, Deserialize)]
pub struct OAuthAppConfig {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to the env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub authorize_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct GoogleConfig {
    #[serde(flatten)]
    pub oauth: OAuthAppConfig,
    #[serde(default)]
    pub drive_api: Option<String>,
    #[serde(default)]
    pub sheets_api: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MondayConfig {
    #[serde(flatten)]
    pub oauth: OAuthAppConfig,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub context: ExecutionContext,
    #[serde(skip)]
    pub api_token: Option<Secret<String>>,
    /// Path to a file containing the platform API token used in embedded
    /// context (alternative to MONDAY_API_TOKEN)
    #[serde(default)]
    pub api_token_file: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    15
}

fn default_max_connections() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_refresh_threshold() -> u64 {
    900
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order, per secret:
    /// 1. env var (GOOGLE_CLIENT_SECRET, MONDAY_CLIENT_SECRET, MONDAY_API_TOKEN)
    /// 2. `*_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Some(google) = config.google.as_mut() {
            google.oauth.client_secret = resolve_secret(
                "GOOGLE_CLIENT_SECRET",
                google.oauth.client_secret_file.as_deref(),
            )?;
            if google.oauth.client_secret.is_none() {
                return Err(common::Error::Config(
                    "google client secret missing: set GOOGLE_CLIENT_SECRET or google.client_secret_file".into(),
                ));
            }
        }

        if let Some(monday) = config.monday.as_mut() {
            monday.oauth.client_secret = resolve_secret(
                "MONDAY_CLIENT_SECRET",
                monday.oauth.client_secret_file.as_deref(),
            )?;
            if monday.oauth.client_secret.is_none() {
                return Err(common::Error::Config(
                    "monday client secret missing: set MONDAY_CLIENT_SECRET or monday.client_secret_file".into(),
                ));
            }
            monday.api_token =
                resolve_secret("MONDAY_API_TOKEN", monday.api_token_file.as_deref())?;
            if monday.context == ExecutionContext::Embedded && monday.api_token.is_none() {
                return Err(common::Error::Config(
                    "monday context is embedded but no platform token: set MONDAY_API_TOKEN or monday.api_token_file".into(),
                ));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.google.is_none() && self.monday.is_none() {
            return Err(common::Error::Config(
                "at least one of [google] or [monday] must be configured".into(),
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(common::Error::Config(
                "http.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.refresh.enabled && (self.refresh.interval_secs == 0 || self.refresh.threshold_secs == 0)
        {
            return Err(common::Error::Config(
                "refresh.interval_secs and refresh.threshold_secs must be greater than 0".into(),
            ));
        }

        if let Some(google) = &self.google {
            validate_oauth_app("google", &google.oauth)?;
            validate_url("google.drive_api", google.drive_api.as_deref())?;
            validate_url("google.sheets_api", google.sheets_api.as_deref())?;
        }
        if let Some(monday) = &self.monday {
            validate_oauth_app("monday", &monday.oauth)?;
            validate_url("monday.api_url", monday.api_url.as_deref())?;
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oh-sheets.toml")
    }
}

fn validate_oauth_app(section: &str, app: &OAuthAppConfig) -> common::Result<()> {
    if app.client_id.trim().is_empty() {
        return Err(common::Error::Config(format!(
            "{section}.client_id must not be empty"
        )));
    }
    validate_url(&format!("{section}.redirect_uri"), Some(app.redirect_uri.as_str()))?;
    validate_url(&format!("{section}.authorize_url"), app.authorize_url.as_deref())?;
    validate_url(&format!("{section}.token_url"), app.token_url.as_deref())?;
    Ok(())
}

fn validate_url(field: &str, url: Option<&str>) -> common::Result<()> {
    match url {
        Some(u) if !u.starts_with("http://") && !u.starts_with("https://") => {
            Err(common::Error::Config(format!(
                "{field} must start with http:// or https://, got: {u}"
            )))
        }
        _ => Ok(()),
    }
}

/// Env var takes precedence over file. Blank values count as unset.
fn resolve_secret(env_var: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var) {
        let value = value.trim().to_owned();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value)));
        }
    }
    let Some(file) = file else {
        return Ok(None);
    };
    let value = std::fs::read_to_string(file).map_err(|e| {
        common::Error::Config(format!("failed to read {}: {e}", file.display()))
    })?;
    let value = value.trim().to_owned();
    Ok((!value.is_empty()).then(|| Secret::new(value)))
}
