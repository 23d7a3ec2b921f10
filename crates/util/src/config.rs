use std::{env, fmt, net::SocketAddr, path::PathBuf, time::Duration};

use super::{server_bind_address, BindAddressError};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://kick-calories.db?mode=rwc";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";
pub const DEFAULT_OAUTH_BASE_URL: &str = "https://id.kick.com/oauth/";
pub const DEFAULT_API_BASE_URL: &str = "https://api.kick.com/public/v1/";
pub const DEFAULT_OVERLAY_PATH: &str = "test_overlay.html";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 600;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when cookies and logs should use production settings.
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub client_id: String,
    pub client_secret: String,
    pub database_url: String,
    pub redirect_uri: String,
    pub oauth_base_url: String,
    pub api_base_url: String,
    pub overlay_path: PathBuf,
    pub http_timeout: Duration,
    pub session_ttl: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        Ok(Self {
            bind_addr,
            environment,
            client_id: required("CLIENT_ID")?,
            client_secret: required("CLIENT_SECRET")?,
            database_url: optional("DATABASE_URL", DEFAULT_DATABASE_URL),
            redirect_uri: optional("REDIRECT_URI", DEFAULT_REDIRECT_URI),
            oauth_base_url: with_trailing_slash(optional(
                "KICK_OAUTH_BASE_URL",
                DEFAULT_OAUTH_BASE_URL,
            )),
            api_base_url: with_trailing_slash(optional("KICK_API_BASE_URL", DEFAULT_API_BASE_URL)),
            overlay_path: PathBuf::from(optional("OVERLAY_PATH", DEFAULT_OVERLAY_PATH)),
            http_timeout: Duration::from_secs(seconds(
                "HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            session_ttl: Duration::from_secs(seconds(
                "SESSION_TTL_SECS",
                DEFAULT_SESSION_TTL_SECS,
            )?),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

fn optional(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn seconds(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidNumber { name, value: raw }),
    }
}

// Relative joins against a base without a trailing slash drop its last segment.
fn with_trailing_slash(mut value: String) -> String {
    if !value.ends_with('/') {
        value.push('/');
    }
    value
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(BindAddressError),
    MissingVar(&'static str),
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid bind address: {err}"),
            Self::MissingVar(name) => write!(f, "{name} must be set"),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a positive integer (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
