use axum::http::HeaderValue;
use ipnetwork::IpNetwork;
use gatekeeper_core::settings::{keys, SecuritySettings};

use crate::auth::jwt::JwtConfig;

/// Fatal configuration problems detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set in the environment")]
    Missing(&'static str),

    #[error("{var} has an invalid value '{value}'")]
    Invalid { var: &'static str, value: String },

    #[error("JWT_SECRET must be at least {min} bytes long")]
    WeakSecret { min: usize },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("Invalid security settings: {0}")]
    Settings(String),
}

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// Reverse proxies whose forwarding headers are believed. Empty means
    /// the socket peer is always the client.
    pub trusted_proxies: Vec<IpNetwork>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// JWT token configuration (secret, issuer, audience, expiry durations).
    pub jwt: JwtConfig,
    /// Key for the reuse ledger's keyed hash. Falls back to the JWT secret.
    pub reuse_ledger_key: String,
    pub reuse_ledger_ttl_hours: i64,
    /// Geo-lookup endpoint; `{ip}` is replaced with the client address.
    /// `None` disables lookups.
    pub geo_lookup_url: Option<String>,
    pub geo_lookup_timeout_secs: u64,
    pub session_sweep_interval_secs: u64,
    pub retention_sweep_interval_secs: u64,
    /// How long expired refresh tokens are kept before the retention sweep
    /// deletes them.
    pub refresh_token_retention_days: i64,
    /// Security settings before persisted overrides are applied.
    pub security_defaults: SecuritySettings,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                  |
    /// |---------------------------------|--------------------------|
    /// | `HOST`                          | `0.0.0.0`                |
    /// | `PORT`                          | `3000`                   |
    /// | `CORS_ORIGINS`                  | `http://localhost:5173`  |
    /// | `TRUSTED_PROXIES`               | empty (none)             |
    /// | `REQUEST_TIMEOUT_SECS`          | `30`                     |
    /// | `SHUTDOWN_TIMEOUT_SECS`         | `30`                     |
    /// | `REUSE_LEDGER_KEY`              | value of `JWT_SECRET`    |
    /// | `REUSE_LEDGER_TTL_HOURS`        | `24`                     |
    /// | `GEO_LOOKUP_URL`                | unset (disabled)         |
    /// | `GEO_LOOKUP_TIMEOUT_SECS`       | `3`                      |
    /// | `SESSION_SWEEP_INTERVAL_SECS`   | `300`                    |
    /// | `RETENTION_SWEEP_INTERVAL_SECS` | `3600`                   |
    /// | `REFRESH_TOKEN_RETENTION_DAYS`  | `30`                     |
    ///
    /// Security settings are read from the upper-cased setting names
    /// (`MAX_CONCURRENT_SESSIONS`, `ENABLE_IP_BLOCKING`, ...). See
    /// [`JwtConfig::from_env`] for the JWT variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_var("PORT", 3000)?;

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(bad) = cors_origins
            .iter()
            .find(|origin| HeaderValue::from_str(origin).is_err())
        {
            return Err(ConfigError::Invalid {
                var: "CORS_ORIGINS",
                value: bad.clone(),
            });
        }

        let trusted_proxies =
            parse_trusted_proxies(&std::env::var("TRUSTED_PROXIES").unwrap_or_default())?;

        let request_timeout_secs: u64 = parse_var("REQUEST_TIMEOUT_SECS", 30)?;
        let shutdown_timeout_secs: u64 = parse_var("SHUTDOWN_TIMEOUT_SECS", 30)?;

        let jwt = JwtConfig::from_env()?;

        let reuse_ledger_key = std::env::var("REUSE_LEDGER_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| jwt.secret.clone());

        let geo_lookup_url = std::env::var("GEO_LOOKUP_URL")
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        Ok(Self {
            host,
            port,
            cors_origins,
            trusted_proxies,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt,
            reuse_ledger_key,
            reuse_ledger_ttl_hours: parse_var("REUSE_LEDGER_TTL_HOURS", 24)?,
            geo_lookup_url,
            geo_lookup_timeout_secs: parse_var("GEO_LOOKUP_TIMEOUT_SECS", 3)?,
            session_sweep_interval_secs: parse_var("SESSION_SWEEP_INTERVAL_SECS", 300)?,
            retention_sweep_interval_secs: parse_var("RETENTION_SWEEP_INTERVAL_SECS", 3600)?,
            refresh_token_retention_days: parse_var("REFRESH_TOKEN_RETENTION_DAYS", 30)?,
            security_defaults: security_settings_from_env()?,
        })
    }
}

/// Read `var` and parse it, falling back to `default` when unset.
pub(crate) fn parse_var<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated list of addresses or CIDR ranges.
pub fn parse_trusted_proxies(raw: &str) -> Result<Vec<IpNetwork>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry.parse::<IpNetwork>().map_err(|_| ConfigError::Invalid {
                var: "TRUSTED_PROXIES",
                value: entry.to_string(),
            })
        })
        .collect()
}

fn security_settings_from_env() -> Result<SecuritySettings, ConfigError> {
    let mut settings = SecuritySettings::default();
    for key in keys::ALL {
        if let Ok(value) = std::env::var(key.to_uppercase()) {
            settings
                .set(key, &value)
                .map_err(|e| ConfigError::Settings(e.to_string()))?;
        }
    }
    settings
        .check()
        .map_err(|e| ConfigError::Settings(e.to_string()))?;
    Ok(settings)
}
