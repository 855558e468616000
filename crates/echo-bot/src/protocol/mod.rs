//! Wire format for the two game channels.
//!
//! Both channels carry one JSON value per newline-terminated line. The data
//! channel speaks objects keyed by an integer `m`; the lobby channel speaks
//! arrays whose first element is a tag.
//!
//! - [`frame`] - line classification shared by both channels
//! - [`data`] - data channel messages and outbound builders
//! - [`lobby`] - lobby channel messages and outbound builders

pub mod data;
pub mod frame;
pub mod lobby;

use serde_json::Value;
use std::fmt;

pub use frame::{Frame, FrameError};

/// Which of the two sockets a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Account channel: roster, invitations, auth challenge, heartbeats.
    Data,
    /// In-race channel, one per accepted invitation.
    Lobby,
}

impl ChannelKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Data => "data",
            ChannelKind::Lobby => "lobby",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read an integer the way the game server writes them: a JSON number
/// (integral floats included) or a numeric string.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn lenient_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                // Bounded above, so the cast is exact.
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a string field, accepting numbers rendered as strings.
#[must_use]
pub fn lenient_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
