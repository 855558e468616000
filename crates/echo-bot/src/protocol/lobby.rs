//! Lobby channel messages.
//!
//! Inbound frames are arrays whose first element is a tag. The server sends
//! tags as strings; integers are accepted and rendered as strings.
//!
//! Operands the bot only echoes back (killer id, power-up, hit type,
//! positions, ping payloads, join counters) are kept as raw JSON values so
//! they round-trip exactly as the server wrote them.

use super::data::object;
use super::frame::{Frame, FrameError};
use super::{lenient_int, lenient_string};
use serde_json::{json, Value};

pub const TAG_COUNTDOWN: &str = "5";
pub const TAG_RACE_OVER: &str = "7";
pub const TAG_DEATH: &str = "13";
pub const TAG_PING: &str = "16";
pub const TAG_CLOCK: &str = "17";
pub const TAG_MOVEMENT: &str = "18";
pub const TAG_RACE_FINISHED: &str = "28";
pub const TAG_QUICK_RACE: &str = "30";
pub const TAG_QUICK_RACE_END: &str = "35";
pub const TAG_JOIN: &str = "39";

/// Divisor turning the server's broadcast clock into milliseconds.
pub const SERVER_CLOCK_DIVISOR: i64 = 1_000_000;

/// A classified lobby frame.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyMessage {
    /// "5": race countdown started.
    Countdown,
    /// "7": race over, rejoin afterwards.
    RaceOver,
    /// "13" with `data[1]==1`: the bot died.
    Death {
        respawn_delay: i64,
        killer_id: Value,
        power_up: Value,
        hit_type: Value,
    },
    /// "16": ping carrying a payload to echo.
    Ping(Value),
    /// "17": server clock broadcast, already scaled to milliseconds.
    ClockSync(i64),
    /// "18" with `data[1]==1`: movement to mirror.
    Movement {
        x: Value,
        y: Value,
        vx: Value,
        vy: Value,
    },
    /// "28": race finished, no rejoin.
    RaceFinished,
    /// "30": quick race flag changed.
    QuickRace(bool),
    /// "35": ends the race while the quick race flag is set.
    QuickRaceEnd,
    /// "39": join handshake with the server's counter.
    Join(Value),
    /// A known tag whose subject is not the bot ("13"/"18" with `data[1]!=1`).
    NotForBot(String),
    /// An unknown tag.
    Unknown(String),
}

impl LobbyMessage {
    /// Interpret a lobby array.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::MissingField("tag")` for an empty array or a tag
    /// of the wrong type, and `FrameError::MissingOperand` when a required
    /// operand is absent or not an integer.
    pub fn parse(items: &[Value]) -> Result<LobbyMessage, FrameError> {
        let tag = items
            .first()
            .and_then(lenient_string)
            .ok_or(FrameError::MissingField("tag"))?;
        let operands = Operands { tag: &tag, items };

        let message = match tag.as_str() {
            TAG_COUNTDOWN => LobbyMessage::Countdown,
            TAG_RACE_OVER => LobbyMessage::RaceOver,
            TAG_DEATH => {
                if operands.int(1)? != 1 {
                    return Ok(LobbyMessage::NotForBot(tag));
                }
                LobbyMessage::Death {
                    respawn_delay: operands.int(2)?,
                    killer_id: operands.raw(3)?,
                    power_up: operands.raw(4)?,
                    hit_type: operands.raw(6)?,
                }
            }
            TAG_PING => LobbyMessage::Ping(operands.raw(1)?),
            TAG_CLOCK => LobbyMessage::ClockSync(operands.int(1)? / SERVER_CLOCK_DIVISOR),
            TAG_MOVEMENT => {
                if operands.int(1)? != 1 {
                    return Ok(LobbyMessage::NotForBot(tag));
                }
                LobbyMessage::Movement {
                    x: operands.raw(2)?,
                    y: operands.raw(3)?,
                    vx: operands.raw(4)?,
                    vy: operands.raw(5)?,
                }
            }
            TAG_RACE_FINISHED => LobbyMessage::RaceFinished,
            TAG_QUICK_RACE => LobbyMessage::QuickRace(operands.int(1)? == 1),
            TAG_QUICK_RACE_END => LobbyMessage::QuickRaceEnd,
            TAG_JOIN => LobbyMessage::Join(operands.raw(1)?),
            _ => LobbyMessage::Unknown(tag),
        };

        Ok(message)
    }
}

struct Operands<'a> {
    tag: &'a str,
    items: &'a [Value],
}

impl Operands<'_> {
    fn missing(&self, index: usize) -> FrameError {
        FrameError::MissingOperand {
            tag: self.tag.to_string(),
            index,
        }
    }

    fn raw(&self, index: usize) -> Result<Value, FrameError> {
        self.items
            .get(index)
            .cloned()
            .ok_or_else(|| self.missing(index))
    }

    fn int(&self, index: usize) -> Result<i64, FrameError> {
        self.items
            .get(index)
            .and_then(lenient_int)
            .ok_or_else(|| self.missing(index))
    }
}

/// Countdown acknowledgement `[19]`.
#[must_use]
pub fn countdown_ack() -> Frame {
    Frame::Array(vec![json!(19)])
}

/// Rejoin request `[16]`.
#[must_use]
pub fn rejoin_request() -> Frame {
    Frame::Array(vec![json!(16)])
}

/// Death acknowledgement `[9, respawn_time, killer, power_up, 0, hit_type]`.
#[must_use]
pub fn death_ack(respawn_time: i64, killer_id: Value, power_up: Value, hit_type: Value) -> Frame {
    Frame::Array(vec![
        json!(9),
        json!(respawn_time),
        killer_id,
        power_up,
        json!(0),
        hit_type,
    ])
}

/// Pong `[4, payload]`.
#[must_use]
pub fn pong(payload: Value) -> Frame {
    Frame::Array(vec![json!(4), payload])
}

/// Movement echo `[3, server_time, x, y, vx, vy]`.
#[must_use]
pub fn movement_echo(server_time: i64, x: Value, y: Value, vx: Value, vy: Value) -> Frame {
    Frame::Array(vec![json!(3), json!(server_time), x, y, vx, vy])
}

/// Join reply `{a: counter, p: bot_id, m: 5, t: 4, g: lobby_token}`.
#[must_use]
pub fn join_reply(counter: Value, bot_id: &str, lobby_token: &Value) -> Frame {
    object([
        ("a", counter),
        ("p", json!(bot_id)),
        ("m", json!(5)),
        ("t", json!(4)),
        ("g", lobby_token.clone()),
    ])
}
