//! Data channel messages.
//!
//! Inbound frames are objects dispatched on the integer field `m`:
//!
//! | m  | meaning |
//! |----|---------|
//! | 1  | contact roster in `f`, entries `{p: id, n: name}` |
//! | 35 | lobby invitation `{a: ip, p: inviter, s: token}` |
//! | 51 | auth challenge |
//!
//! Outbound: the challenge reply, the `{"m":37}` heartbeat and the
//! `{"m":45,"s":n}` status update.

use super::frame::{Frame, FrameError};
use super::{lenient_int, lenient_string};
use crate::model::{BotIdentity, BotStatus, Contact, Invitation};
use common::secret::ExposeSecret;
use serde_json::{json, Map, Value};

pub const MSG_ROSTER: i64 = 1;
pub const MSG_INVITATION: i64 = 35;
pub const MSG_HEARTBEAT: i64 = 37;
pub const MSG_STATUS: i64 = 45;
pub const MSG_CHALLENGE: i64 = 51;

/// Message type of the challenge reply.
const MSG_CHALLENGE_REPLY: i64 = 1;

/// Value of `b` in the challenge reply.
const CHALLENGE_REPLY_BUILD: i64 = 35;

/// A classified data channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DataMessage {
    /// Roster in input order, plus the number of entries skipped for
    /// missing `p` or `n`.
    Roster {
        contacts: Vec<Contact>,
        skipped: usize,
    },
    Invitation(Invitation),
    Challenge,
    /// Any other `m`; ignored by the bot.
    Other(i64),
}

impl DataMessage {
    /// Interpret a data channel object.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::MissingField` when `m` or a field required by the
    /// message kind is absent or has the wrong type.
    pub fn parse(object: &Map<String, Value>) -> Result<DataMessage, FrameError> {
        let kind = object
            .get("m")
            .and_then(lenient_int)
            .ok_or(FrameError::MissingField("m"))?;

        match kind {
            MSG_ROSTER => parse_roster(object),
            MSG_INVITATION => parse_invitation(object).map(DataMessage::Invitation),
            MSG_CHALLENGE => Ok(DataMessage::Challenge),
            other => Ok(DataMessage::Other(other)),
        }
    }
}

fn parse_roster(object: &Map<String, Value>) -> Result<DataMessage, FrameError> {
    let entries = object
        .get("f")
        .and_then(Value::as_array)
        .ok_or(FrameError::MissingField("f"))?;

    let mut contacts = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for entry in entries {
        let id = entry.get("p").and_then(lenient_string);
        let name = entry.get("n").and_then(lenient_string);
        match (id, name) {
            (Some(id), Some(name)) => contacts.push(Contact::new(id, name)),
            _ => skipped += 1,
        }
    }

    Ok(DataMessage::Roster { contacts, skipped })
}

fn parse_invitation(object: &Map<String, Value>) -> Result<Invitation, FrameError> {
    let field = |key: &'static str| {
        object
            .get(key)
            .and_then(lenient_string)
            .ok_or(FrameError::MissingField(key))
    };

    let token = object
        .get("s")
        .filter(|v| v.is_string() || v.is_number())
        .cloned()
        .ok_or(FrameError::MissingField("s"))?;

    Ok(Invitation {
        ip: field("a")?,
        inviter_id: field("p")?,
        token,
    })
}

/// Reply to the `m=51` challenge: `{a: token, p: id, b: 35, m: 1, v: version}`.
#[must_use]
pub fn challenge_reply(identity: &BotIdentity, client_version: &str) -> Frame {
    object([
        ("a", json!(identity.auth_token.expose_secret())),
        ("p", json!(identity.id)),
        ("b", json!(CHALLENGE_REPLY_BUILD)),
        ("m", json!(MSG_CHALLENGE_REPLY)),
        ("v", json!(client_version)),
    ])
}

/// The keepalive frame `{"m":37}`.
#[must_use]
pub fn heartbeat() -> Frame {
    object([("m", json!(MSG_HEARTBEAT))])
}

/// Presence update `{"m":45,"s":status}`.
#[must_use]
pub fn status_update(status: BotStatus) -> Frame {
    object([("m", json!(MSG_STATUS)), ("s", json!(status.value()))])
}

pub(crate) fn object<const N: usize>(fields: [(&str, Value); N]) -> Frame {
    Frame::Object(
        fields
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect(),
    )
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn parse(value: Value) -> Result<DataMessage, FrameError> {
        DataMessage::parse(value.as_object().unwrap())
    }

    #[test]
    fn test_parse_roster_in_order() {
        let msg = parse(json!({
            "m": 1,
            "f": [{"p": "id1", "n": "Alice"}, {"p": "id2", "n": "Bob"}]
        }))
        .unwrap();

        let DataMessage::Roster { contacts, skipped } = msg else {
            panic!("expected roster");
        };
        assert_eq!(skipped, 0);
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].id, "id1");
        assert_eq!(contacts[0].display_name, "Alice");
        assert_eq!(contacts[1].id, "id2");
        assert_eq!(contacts[1].display_name, "Bob");
    }

    #[test]
    fn test_parse_roster_skips_incomplete_entries() {
        let msg = parse(json!({
            "m": "1",
            "f": [{"p": "id1"}, {"n": "Nameless"}, {"p": 7, "n": "Numeric"}]
        }))
        .unwrap();

        assert_eq!(
            msg,
            DataMessage::Roster {
                contacts: vec![Contact::new("7", "Numeric")],
                skipped: 2,
            }
        );
    }

    #[test]
    fn test_parse_roster_requires_list() {
        assert_eq!(
            parse(json!({"m": 1})),
            Err(FrameError::MissingField("f"))
        );
    }

    #[test]
    fn test_parse_invitation() {
        let msg = parse(json!({"m": 35, "a": "10.1.2.3", "p": "id1", "s": 4711})).unwrap();
        assert_eq!(
            msg,
            DataMessage::Invitation(Invitation {
                ip: "10.1.2.3".to_string(),
                inviter_id: "id1".to_string(),
                token: json!(4711),
            })
        );

        assert_eq!(
            parse(json!({"m": 35, "a": "10.1.2.3", "p": "id1"})),
            Err(FrameError::MissingField("s"))
        );
    }

    #[test]
    fn test_parse_challenge_and_other() {
        assert_eq!(parse(json!({"m": 51})).unwrap(), DataMessage::Challenge);
        assert_eq!(parse(json!({"m": "51"})).unwrap(), DataMessage::Challenge);
        assert_eq!(parse(json!({"m": 99, "x": 1})).unwrap(), DataMessage::Other(99));
        assert_eq!(parse(json!({"x": 1})), Err(FrameError::MissingField("m")));
    }

    #[test]
    fn test_challenge_reply_exact() {
        let identity = BotIdentity::new("P", "A");
        let reply = challenge_reply(&identity, "2.4");
        assert_eq!(
            reply.to_value(),
            json!({"a": "A", "p": "P", "b": 35, "m": 1, "v": "2.4"})
        );
    }

    #[test]
    fn test_outbound_builders() {
        assert_eq!(heartbeat().encode().unwrap(), r#"{"m":37}"#);
        assert_eq!(
            status_update(BotStatus::IDLE).to_value(),
            json!({"m": 45, "s": 1})
        );
    }
}
