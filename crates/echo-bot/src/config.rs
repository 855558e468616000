//! Echo bot configuration.
//!
//! Configuration is loaded from environment variables. The password is
//! redacted in Debug output.

use crate::actors::CoordinatorConfig;
use common::login::LoginConfig;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default login endpoint.
pub const DEFAULT_LOGIN_URL: &str = "https://minttuentrypoint.dirtybit.no:6389";

/// Default data channel host.
pub const DEFAULT_GAME_HOST: &str = "minttuentrypoint.dirtybit.no";

/// Default data channel port.
pub const DEFAULT_DATA_PORT: u16 = 6689;

/// Lobby servers always listen on this port.
pub const DEFAULT_LOBBY_PORT: u16 = 6789;

/// Client build reported in the challenge reply.
pub const DEFAULT_CLIENT_VERSION: &str = "2.4";

/// Default heartbeat period in seconds.
pub const DEFAULT_KEEPALIVE_INTERVAL_SECONDS: u64 = 30;

/// Default TCP connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Echo bot configuration.
#[derive(Clone)]
pub struct Config {
    /// Login email.
    pub email: String,

    /// Login password. Protected by `SecretString` to prevent accidental logging.
    pub password: SecretString,

    /// HTTPS login endpoint.
    pub login_url: String,

    /// Data channel host.
    pub game_host: String,

    pub data_port: u16,

    pub lobby_port: u16,

    pub client_version: String,

    /// Heartbeat period on the data channel (never zero).
    pub keepalive_interval_seconds: u64,

    pub connect_timeout_seconds: u64,

    /// Contact selected automatically once it appears in a roster.
    pub follow_contact_id: Option<String>,
}

/// Custom Debug implementation that redacts the password.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("login_url", &self.login_url)
            .field("game_host", &self.game_host)
            .field("data_port", &self.data_port)
            .field("lobby_port", &self.lobby_port)
            .field("client_version", &self.client_version)
            .field(
                "keepalive_interval_seconds",
                &self.keepalive_interval_seconds,
            )
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .field("follow_contact_id", &self.follow_contact_id)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingEnvVar` if `BOT_EMAIL` or `BOT_PASSWORD` is absent
    /// - `ConfigError::InvalidValue` for unparseable numbers or a zero keepalive
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let email = required(vars, "BOT_EMAIL")?;
        let password = SecretString::from(required(vars, "BOT_PASSWORD")?);

        let login_url = vars
            .get("BOT_LOGIN_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string());

        let game_host = vars
            .get("BOT_GAME_HOST")
            .cloned()
            .unwrap_or_else(|| DEFAULT_GAME_HOST.to_string());

        let data_port = parsed(vars, "BOT_DATA_PORT", DEFAULT_DATA_PORT)?;
        let lobby_port = parsed(vars, "BOT_LOBBY_PORT", DEFAULT_LOBBY_PORT)?;

        let client_version = vars
            .get("BOT_CLIENT_VERSION")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CLIENT_VERSION.to_string());

        let keepalive_interval_seconds = parsed(
            vars,
            "BOT_KEEPALIVE_INTERVAL_SECONDS",
            DEFAULT_KEEPALIVE_INTERVAL_SECONDS,
        )?;
        if keepalive_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "BOT_KEEPALIVE_INTERVAL_SECONDS must be greater than zero".to_string(),
            ));
        }

        let connect_timeout_seconds = parsed(
            vars,
            "BOT_CONNECT_TIMEOUT_SECONDS",
            DEFAULT_CONNECT_TIMEOUT_SECONDS,
        )?;

        let follow_contact_id = vars
            .get("BOT_FOLLOW_CONTACT_ID")
            .filter(|id| !id.is_empty())
            .cloned();

        Ok(Config {
            email,
            password,
            login_url,
            game_host,
            data_port,
            lobby_port,
            client_version,
            keepalive_interval_seconds,
            connect_timeout_seconds,
            follow_contact_id,
        })
    }

    /// Settings for the session coordinator.
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            game_host: self.game_host.clone(),
            data_port: self.data_port,
            lobby_port: self.lobby_port,
            client_version: self.client_version.clone(),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_seconds),
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
            follow_contact_id: self.follow_contact_id.clone(),
        }
    }

    /// Settings for the HTTPS login exchange.
    #[must_use]
    pub fn login_config(&self) -> LoginConfig {
        LoginConfig::new(
            self.login_url.clone(),
            self.email.clone(),
            self.password.clone(),
        )
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parsed<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
    }
}
