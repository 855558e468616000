//! One-shot HTTPS login exchange.
//!
//! The game's login server trades an email/password pair for the bot's
//! player id and an auth token. Both are needed before the data channel can
//! answer its authentication challenge.
//!
//! # Example
//!
//! ```rust,ignore
//! use common::login::{CredentialProvider, HttpsLogin, LoginConfig};
//! use common::secret::SecretString;
//!
//! let login = HttpsLogin::new(LoginConfig::new(
//!     "https://login.example.com:6389".to_string(),
//!     "bot@example.com".to_string(),
//!     SecretString::from("password"),
//! ))?;
//!
//! let identity = login.credentials().await?;
//! println!("logged in as {}", identity.id);
//! ```
//!
//! # Wire format
//!
//! Request body (sent with a form content type, as the game client does):
//!
//! ```text
//! {"e": "<email>", "d": "", "w": "<password>", "m": 3}
//! ```
//!
//! Response body (gzip-encoded JSON):
//!
//! ```text
//! {"m": 3, "a": "<auth token>", "p": "<player id>"}   success
//! {"m": 3, "r": 1}                                    bad email/password
//! ```

use crate::secret::{ExposeSecret, SecretString};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for the HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// User agent of the mobile client the login server expects.
pub const DEFAULT_USER_AGENT: &str = "Fun%20Run%202/47 CFNetwork/711.4.6 Darwin/14.0.0";

/// Message type of a login request and its response.
const LOGIN_MESSAGE_TYPE: i64 = 3;

/// Rejection code for an unknown email or wrong password.
const REJECT_BAD_CREDENTIALS: i64 = 1;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during the login exchange.
#[derive(Error, Debug, Clone)]
pub enum LoginError {
    /// HTTP transport failure (DNS, TLS, timeout, reset).
    #[error("HTTP client error: {0}")]
    Http(String),

    /// The login server answered with a non-success status.
    #[error("Login rejected: {0}")]
    Rejected(String),

    /// The server recognised the request but refused the email/password.
    #[error("Bad email or password for {email}")]
    BadCredentials { email: String },

    /// The response could not be interpreted.
    #[error("Unexpected login response: {0}")]
    UnexpectedResponse(String),

    /// Client configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

// =============================================================================
// Identity
// =============================================================================

/// Credentials issued by the login server.
///
/// Set once after login and read-only afterwards. The auth token is only
/// exposed when encoding the challenge reply.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    /// The bot's player id.
    pub id: String,
    /// Token proving the login to the data channel.
    pub auth_token: SecretString,
}

impl BotIdentity {
    #[must_use]
    pub fn new(id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            auth_token: SecretString::from(auth_token.into()),
        }
    }
}

/// Source of bot credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain the bot identity. Called once per bot start; never retried.
    async fn credentials(&self) -> Result<BotIdentity, LoginError>;
}

/// Provider that hands out a pre-issued identity.
#[derive(Debug, Clone)]
pub struct StaticCredentials(BotIdentity);

impl StaticCredentials {
    #[must_use]
    pub fn new(identity: BotIdentity) -> Self {
        Self(identity)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self) -> Result<BotIdentity, LoginError> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the HTTPS login exchange.
#[derive(Clone)]
pub struct LoginConfig {
    /// Login endpoint URL (e.g., `https://host:6389`).
    pub login_url: String,

    /// Bot account email.
    pub email: String,

    /// Bot account password (as `SecretString`).
    pub password: SecretString,

    /// User agent sent with the request.
    pub user_agent: String,

    /// HTTP request timeout.
    pub http_timeout: Duration,
}

impl std::fmt::Debug for LoginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginConfig")
            .field("login_url", &self.login_url)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("user_agent", &self.user_agent)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl LoginConfig {
    /// Create a new configuration with default user agent and timeout.
    #[must_use]
    pub fn new(login_url: String, email: String, password: SecretString) -> Self {
        Self {
            login_url,
            email,
            password,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

// =============================================================================
// HTTPS Login
// =============================================================================

/// Credential provider backed by the game's HTTPS login endpoint.
#[derive(Debug)]
pub struct HttpsLogin {
    config: LoginConfig,
    http_client: reqwest::Client,
}

impl HttpsLogin {
    /// Build the HTTP client for the exchange.
    ///
    /// # Errors
    ///
    /// Returns `LoginError::Configuration` if the user agent is not a valid
    /// header value or the HTTP client cannot be built.
    pub fn new(config: LoginConfig) -> Result<Self, LoginError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-us"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.as_str())
            .timeout(config.http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LoginError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn request_body(&self) -> String {
        serde_json::json!({
            "e": self.config.email,
            "d": "",
            "w": self.config.password.expose_secret(),
            "m": LOGIN_MESSAGE_TYPE,
        })
        .to_string()
    }
}

#[async_trait]
impl CredentialProvider for HttpsLogin {
    #[instrument(skip_all, fields(email = %self.config.email))]
    async fn credentials(&self) -> Result<BotIdentity, LoginError> {
        debug!(
            target: "common.login",
            url = %self.config.login_url,
            "Sending login request"
        );

        let response = self
            .http_client
            .post(&self.config.login_url)
            .body(self.request_body())
            .send()
            .await
            .map_err(|e| {
                debug!(target: "common.login", error = %e, "HTTP request failed");
                LoginError::Http(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                target: "common.login",
                status = %status,
                "Login server returned an error status"
            );
            return Err(LoginError::Rejected(format!("Status {status}")));
        }

        let body = response.text().await.map_err(|e| {
            warn!(target: "common.login", error = %e, "Failed to read login response");
            LoginError::Http(e.to_string())
        })?;
        // Response bodies carry the auth token, so only trace them.
        trace!(target: "common.login", body_len = body.len(), "Login response received");

        let identity = parse_login_response(&body, &self.config.email)?;
        info!(
            target: "common.login",
            bot_id = %identity.id,
            "Login succeeded"
        );
        Ok(identity)
    }
}

/// Interpret a login response body.
///
/// # Errors
///
/// - `LoginError::BadCredentials` for rejection code 1
/// - `LoginError::UnexpectedResponse` for anything else that is not a success
pub fn parse_login_response(body: &str, email: &str) -> Result<BotIdentity, LoginError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| LoginError::UnexpectedResponse(format!("invalid JSON: {e}")))?;

    let message_type = value.get("m").and_then(Value::as_i64);
    if message_type != Some(LOGIN_MESSAGE_TYPE) {
        return Err(LoginError::UnexpectedResponse(format!(
            "message type {message_type:?}"
        )));
    }

    let token = value.get("a").and_then(Value::as_str);
    let id = value.get("p").and_then(Value::as_str);
    if let (Some(token), Some(id)) = (token, id) {
        return Ok(BotIdentity::new(id, token));
    }

    match value.get("r").and_then(Value::as_i64) {
        Some(REJECT_BAD_CREDENTIALS) => Err(LoginError::BadCredentials {
            email: email.to_string(),
        }),
        Some(code) => Err(LoginError::UnexpectedResponse(format!(
            "rejection code {code}"
        ))),
        None => Err(LoginError::UnexpectedResponse(
            "missing token or player id".to_string(),
        )),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> LoginConfig {
        LoginConfig::new(
            base_url.to_string(),
            "bot@example.com".to_string(),
            SecretString::from("pw-secret"),
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = test_config("https://localhost:6389");
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_config_debug_redacts_password() {
        let config = test_config("https://localhost:6389");
        let debug_str = format!("{config:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("pw-secret"));
    }

    #[test]
    fn test_identity_debug_redacts_token() {
        let identity = BotIdentity::new("bot-1", "token-value");
        let debug_str = format!("{identity:?}");
        assert!(debug_str.contains("bot-1"));
        assert!(!debug_str.contains("token-value"));
    }

    #[test]
    fn test_parse_success() {
        let identity =
            parse_login_response(r#"{"m":3,"a":"tok","p":"player-9"}"#, "e").unwrap();
        assert_eq!(identity.id, "player-9");
        assert_eq!(identity.auth_token.expose_secret(), "tok");
    }

    #[test]
    fn test_parse_bad_credentials_does_not_echo_password() {
        let err = parse_login_response(r#"{"m":3,"r":1}"#, "bot@example.com").unwrap_err();
        assert!(matches!(err, LoginError::BadCredentials { .. }));
        assert_eq!(err.to_string(), "Bad email or password for bot@example.com");
    }

    #[test]
    fn test_parse_unexpected_shapes() {
        assert!(matches!(
            parse_login_response(r#"{"m":4}"#, "e"),
            Err(LoginError::UnexpectedResponse(_))
        ));
        assert!(matches!(
            parse_login_response(r#"{"m":3,"r":7}"#, "e"),
            Err(LoginError::UnexpectedResponse(_))
        ));
        assert!(matches!(
            parse_login_response("not json", "e"),
            Err(LoginError::UnexpectedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_static_credentials() {
        let provider = StaticCredentials::new(BotIdentity::new("bot-7", "t"));
        let identity = provider.credentials().await.unwrap();
        assert_eq!(identity.id, "bot-7");
    }

    #[tokio::test]
    async fn test_https_login_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains(r#""e":"bot@example.com""#))
            .and(body_string_contains(r#""w":"pw-secret""#))
            .and(body_string_contains(r#""m":3"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "m": 3,
                "a": "issued-token",
                "p": "player-123"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let login = HttpsLogin::new(test_config(&mock_server.uri())).unwrap();
        let identity = login.credentials().await.unwrap();

        assert_eq!(identity.id, "player-123");
        assert_eq!(identity.auth_token.expose_secret(), "issued-token");
    }

    #[tokio::test]
    async fn test_https_login_bad_credentials() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "m": 3, "r": 1 })),
            )
            .mount(&mock_server)
            .await;

        let login = HttpsLogin::new(test_config(&mock_server.uri())).unwrap();
        let result = login.credentials().await;

        assert!(matches!(result, Err(LoginError::BadCredentials { .. })));
    }

    #[tokio::test]
    async fn test_https_login_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let login = HttpsLogin::new(test_config(&mock_server.uri())).unwrap();
        let result = login.credentials().await;

        assert!(matches!(result, Err(LoginError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_https_login_unreachable() {
        // Port 1 on localhost is never listening.
        let config = test_config("http://127.0.0.1:1").with_http_timeout(Duration::from_secs(2));
        let login = HttpsLogin::new(config).unwrap();

        let result = login.credentials().await;
        assert!(matches!(result, Err(LoginError::Http(_))));
    }
}
