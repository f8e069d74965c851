//! Application configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub gateway: GatewayConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Realtime gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// The single endpoint that accepts upgrade requests
    #[serde(default = "default_upgrade_path")]
    pub upgrade_path: String,
    /// Seconds between unsolicited keepalive pings
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Number of system errors kept for late-join replay
    #[serde(default = "default_error_history")]
    pub error_history: usize,
    /// Largest inbound frame payload accepted
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u64,
    /// Depth of each connection's outbound queue
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl GatewayConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            upgrade_path: default_upgrade_path(),
            keepalive_secs: default_keepalive_secs(),
            error_history: default_error_history(),
            max_frame_bytes: default_max_frame_bytes(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "pos-gateway".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_upgrade_path() -> String {
    "/ws/pos".to_string()
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_error_history() -> usize {
    20
}

fn default_max_frame_bytes() -> u64 {
    1024 * 1024
}

fn default_outbound_buffer() -> usize {
    256
}

/// Parse an optional variable, falling back to `default` when it is unset
fn parse_or<T, F>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: F,
) -> Result<T, ConfigError>
where
    T: FromStr,
    F: FnOnce() -> T,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        None => Ok(default()),
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = lookup("GATEWAY_PORT").ok_or(ConfigError::MissingVar("GATEWAY_PORT"))?;
        let port = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue("GATEWAY_PORT", port))?;

        let upgrade_path = lookup("GATEWAY_UPGRADE_PATH").unwrap_or_else(default_upgrade_path);
        if !upgrade_path.starts_with('/') {
            return Err(ConfigError::InvalidValue("GATEWAY_UPGRADE_PATH", upgrade_path));
        }

        let keepalive_secs = parse_or(&lookup, "GATEWAY_KEEPALIVE_SECS", default_keepalive_secs)?;
        if keepalive_secs == 0 {
            return Err(ConfigError::InvalidValue("GATEWAY_KEEPALIVE_SECS", "0".to_string()));
        }

        let error_history = parse_or(&lookup, "GATEWAY_ERROR_HISTORY", default_error_history)?;
        if error_history == 0 {
            return Err(ConfigError::InvalidValue("GATEWAY_ERROR_HISTORY", "0".to_string()));
        }

        let outbound_buffer = parse_or(&lookup, "GATEWAY_OUTBOUND_BUFFER", default_outbound_buffer)?;
        if outbound_buffer == 0 {
            return Err(ConfigError::InvalidValue("GATEWAY_OUTBOUND_BUFFER", "0".to_string()));
        }

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: lookup("APP_ENV")
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
            },
            gateway: GatewayConfig {
                host: lookup("GATEWAY_HOST").unwrap_or_else(default_host),
                port,
                upgrade_path,
                keepalive_secs,
                error_history,
                max_frame_bytes: parse_or(&lookup, "GATEWAY_MAX_FRAME_BYTES", default_max_frame_bytes)?,
                outbound_buffer,
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
