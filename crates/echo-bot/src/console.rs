//! Line-oriented operator console used by the `echo-bot` binary.
//!
//! ```text
//! <n>            select roster entry n (1-based)
//! select <id>    select a contact by id
//! clear          forget the selected contact
//! status <1-3>   set presence status
//! roster         print the roster
//! state          print the bot state
//! quit           shut down
//! ```

use crate::actors::BotEvent;
use crate::model::{BotSnapshot, Contact};
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Select the roster entry at this 1-based position.
    Pick(usize),
    Select(String),
    Clear,
    Status(i64),
    Roster,
    State,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("not a number: {0}")]
    InvalidNumber(String),
}

impl Command {
    /// Parse one console line.
    ///
    /// # Errors
    ///
    /// Returns `CommandError` for blank lines, unknown verbs and bad arguments.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(CommandError::Empty);
        };

        if verb.chars().all(|c| c.is_ascii_digit()) {
            return verb
                .parse()
                .map(Command::Pick)
                .map_err(|_| CommandError::InvalidNumber(verb.to_string()));
        }

        match verb.to_ascii_lowercase().as_str() {
            "select" => words
                .next()
                .map(|id| Command::Select(id.to_string()))
                .ok_or(CommandError::MissingArgument("contact id")),
            "clear" => Ok(Command::Clear),
            "status" => {
                let raw = words.next().ok_or(CommandError::MissingArgument("status"))?;
                raw.parse()
                    .map(Command::Status)
                    .map_err(|_| CommandError::InvalidNumber(raw.to_string()))
            }
            "roster" => Ok(Command::Roster),
            "state" => Ok(Command::State),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Roster listing with the 1-based numbers `Command::Pick` expects.
#[must_use]
pub fn render_roster(contacts: &[Contact]) -> String {
    if contacts.is_empty() {
        return "roster is empty".to_string();
    }
    let mut out = String::new();
    for (index, contact) in contacts.iter().enumerate() {
        let _ = writeln!(out, "{:>3}. {contact}", index + 1);
    }
    out.trim_end().to_string()
}

#[must_use]
pub fn render_snapshot(snapshot: &BotSnapshot) -> String {
    let selected = snapshot
        .selected_contact
        .as_ref()
        .map_or_else(|| "none".to_string(), ToString::to_string);
    format!(
        "bot={} status={} in_lobby={} data_connected={} following={}",
        snapshot.bot_id.as_deref().unwrap_or("-"),
        snapshot.status,
        snapshot.in_lobby,
        snapshot.data_connected,
        selected
    )
}

#[must_use]
pub fn render_event(event: &BotEvent) -> String {
    match event {
        BotEvent::RosterReady(contacts) => format!("roster updated\n{}", render_roster(contacts)),
        BotEvent::StatusChanged(status) => format!("status is now {status}"),
        BotEvent::LoginFailed(reason) => format!("login failed: {reason}"),
        BotEvent::LobbyEntered { inviter_id } => format!("joined lobby of {inviter_id}"),
        BotEvent::LobbyLeft => "left lobby".to_string(),
        BotEvent::ChannelClosed { channel, reason } => {
            format!("{channel} channel closed: {reason}")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::BotStatus;
    use crate::protocol::ChannelKind;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("2"), Ok(Command::Pick(2)));
        assert_eq!(
            Command::parse("select id1"),
            Ok(Command::Select("id1".to_string()))
        );
        assert_eq!(Command::parse("  CLEAR "), Ok(Command::Clear));
        assert_eq!(Command::parse("status 1"), Ok(Command::Status(1)));
        assert_eq!(Command::parse("roster"), Ok(Command::Roster));
        assert_eq!(Command::parse("state"), Ok(Command::State));
        assert_eq!(Command::parse("quit"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Command::parse("   "), Err(CommandError::Empty));
        assert_eq!(
            Command::parse("dance"),
            Err(CommandError::Unknown("dance".to_string()))
        );
        assert_eq!(
            Command::parse("select"),
            Err(CommandError::MissingArgument("contact id"))
        );
        assert_eq!(
            Command::parse("status high"),
            Err(CommandError::InvalidNumber("high".to_string()))
        );
        assert!(matches!(
            Command::parse("99999999999999999999999"),
            Err(CommandError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_render_roster_numbers_from_one() {
        let roster = vec![Contact::new("id1", "Alice"), Contact::new("id2", "Bob")];
        assert_eq!(render_roster(&roster), "  1. Alice (id1)\n  2. Bob (id2)");
        assert_eq!(render_roster(&[]), "roster is empty");
    }

    #[test]
    fn test_render_snapshot_and_events() {
        let snapshot = BotSnapshot {
            bot_id: Some("bot-1".to_string()),
            status: BotStatus::IDLE,
            in_lobby: true,
            selected_contact: Some(Contact::new("id1", "Alice")),
            data_connected: true,
        };
        assert_eq!(
            render_snapshot(&snapshot),
            "bot=bot-1 status=1 in_lobby=true data_connected=true following=Alice (id1)"
        );

        assert_eq!(
            render_event(&BotEvent::ChannelClosed {
                channel: ChannelKind::Lobby,
                reason: "peer closed".to_string(),
            }),
            "lobby channel closed: peer closed"
        );
        assert_eq!(render_event(&BotEvent::LobbyLeft), "left lobby");
    }
}
