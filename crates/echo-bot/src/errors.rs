//! Echo Bot error types.
//!
//! Each variant maps to a short `error_kind()` label used as a structured log
//! field. Connection failures are fatal to the affected session only; nothing
//! in this crate retries automatically.

use crate::protocol::ChannelKind;
use common::login::LoginError;
use thiserror::Error;

/// Echo Bot error type.
#[derive(Debug, Error)]
pub enum BotError {
    /// Host unreachable, refused, reset, or the connect timeout elapsed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A write was attempted after the session stopped.
    #[error("{0} session is closed")]
    SessionClosed(ChannelKind),

    /// Status value outside the accepted range.
    #[error("Invalid status {0}: must be 1, 2 or 3")]
    InvalidStatus(i64),

    /// Operation conflicts with the current bot state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Login exchange failed.
    #[error("Login failed: {0}")]
    Login(#[from] LoginError),

    /// An outbound frame could not be serialized.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Internal error (actor mailbox gone, reply dropped).
    #[error("Internal error: {0}")]
    Internal(String),

    /// The coordinator has been shut down.
    #[error("Bot is shut down")]
    Stopped,
}

impl BotError {
    /// Returns a stable label for log fields.
    #[must_use]
    pub fn error_kind(&self) -> &'static str {
        match self {
            BotError::Connection(_) => "connection",
            BotError::SessionClosed(_) => "session_closed",
            BotError::InvalidStatus(_) | BotError::InvalidState(_) => "invalid_state",
            BotError::Login(_) => "login",
            BotError::Encode(_) => "encode",
            BotError::Internal(_) => "internal",
            BotError::Stopped => "stopped",
        }
    }

    /// Whether the error only concerns a single channel session.
    #[must_use]
    pub fn is_session_scoped(&self) -> bool {
        matches!(self, BotError::Connection(_) | BotError::SessionClosed(_))
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Encode(err.to_string())
    }
}
