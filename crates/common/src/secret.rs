//! Secret types for protecting credentials from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the bot's password and the auth
//! token handed out by the login server. Both end up inside structs that
//! derive `Debug` and flow through `tracing` fields, so they must never be
//! printable by accident.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Session {
//!     bot_id: String,
//!     auth_token: SecretString,
//! }
//!
//! let session = Session {
//!     bot_id: "bot-1".to_string(),
//!     auth_token: SecretString::from("a1b2c3"),
//! };
//!
//! assert!(!format!("{session:?}").contains("a1b2c3"));
//! assert_eq!(session.auth_token.expose_secret(), "a1b2c3");
//! ```
//!
//! Only the wire encoder for the challenge reply and the login request body
//! should call `expose_secret()`.

pub use secrecy::{ExposeSecret, SecretString};
