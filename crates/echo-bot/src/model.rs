//! Bot-side value types: contacts, status, invitations and state snapshots.

use crate::errors::BotError;
use serde_json::Value;
use std::fmt;

pub use common::login::BotIdentity;

/// A friend from the account roster. Equality is by id only.
#[derive(Debug, Clone, Eq)]
pub struct Contact {
    pub id: String,
    pub display_name: String,
}

impl Contact {
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// Presence status reported on the data channel (`{"m":45,"s":n}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotStatus(u8);

impl BotStatus {
    /// Status the bot returns to after a race ends.
    pub const IDLE: BotStatus = BotStatus(1);

    /// Status reported before any explicit change.
    pub const INITIAL: BotStatus = BotStatus(3);

    /// Validate a raw status value.
    ///
    /// # Errors
    ///
    /// Returns `BotError::InvalidStatus` for anything outside 1..=3.
    pub fn new(value: i64) -> Result<Self, BotError> {
        match u8::try_from(value) {
            Ok(v @ 1..=3) => Ok(BotStatus(v)),
            _ => Err(BotError::InvalidStatus(value)),
        }
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for BotStatus {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lobby invitation received on the data channel (`m=35`).
#[derive(Clone, PartialEq)]
pub struct Invitation {
    /// Lobby server address.
    pub ip: String,
    /// Player who sent the invitation.
    pub inviter_id: String,
    /// Lobby token, echoed back verbatim in the join reply.
    pub token: Value,
}

impl fmt::Debug for Invitation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invitation")
            .field("ip", &self.ip)
            .field("inviter_id", &self.inviter_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Point-in-time copy of the coordinator's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotSnapshot {
    pub bot_id: Option<String>,
    pub status: BotStatus,
    pub in_lobby: bool,
    pub selected_contact: Option<Contact>,
    pub data_connected: bool,
}
