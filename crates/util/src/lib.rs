pub mod config;

use std::{
    env,
    net::{AddrParseError, SocketAddr},
};

pub use config::{AppConfig, ConfigError, Environment};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Loads environment variables from `.env` when available.
///
/// Missing files are ignored so the function is safe in production builds
/// where dotenv files are not deployed.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// Returns the address the HTTP server should bind to.
///
/// The port comes from `PORT` (default [`DEFAULT_PORT`]) and the host from
/// `APP_BIND_HOST` (default [`DEFAULT_BIND_HOST`]).
pub fn server_bind_address() -> Result<SocketAddr, BindAddressError> {
    let port = match env::var("PORT") {
        Ok(raw) => raw
            .trim()
            .parse::<u16>()
            .map_err(|_| BindAddressError::Port(raw))?,
        Err(_) => DEFAULT_PORT,
    };
    let host = env::var("APP_BIND_HOST").unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string());
    format!("{host}:{port}")
        .parse()
        .map_err(BindAddressError::Host)
}

/// Reasons the bind address could not be resolved.
#[derive(Debug)]
pub enum BindAddressError {
    Port(String),
    Host(AddrParseError),
}

impl std::fmt::Display for BindAddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Port(value) => write!(f, "PORT must be a number between 0 and 65535 (got {value})"),
            Self::Host(err) => write!(f, "invalid APP_BIND_HOST value: {err}"),
        }
    }
}

impl std::error::Error for BindAddressError {}
