//! Message types for the coordinator mailbox and its event stream.

use crate::errors::BotError;
use crate::model::{BotIdentity, BotSnapshot, BotStatus, Contact, Invitation};
use crate::protocol::ChannelKind;

use super::channel::{ChannelSession, CloseReason};
use tokio::sync::oneshot;

/// Messages handled by the `SessionCoordinator`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Open the data channel with the given identity.
    Connect {
        identity: BotIdentity,
        respond_to: oneshot::Sender<Result<(), BotError>>,
    },

    /// Choose the contact whose invitations are accepted.
    SelectContact {
        contact: Contact,
        respond_to: oneshot::Sender<Result<(), BotError>>,
    },

    /// Forget the selected contact.
    ClearContact {
        respond_to: oneshot::Sender<Result<(), BotError>>,
    },

    /// Change presence status (validated by the caller).
    SetStatus {
        status: BotStatus,
        respond_to: oneshot::Sender<Result<(), BotError>>,
    },

    /// Copy of the current state.
    GetSnapshot {
        respond_to: oneshot::Sender<BotSnapshot>,
    },

    /// Most recent roster.
    GetRoster {
        respond_to: oneshot::Sender<Vec<Contact>>,
    },

    /// Roster parsed by the data channel (`m=1`).
    RosterReady { contacts: Vec<Contact> },

    /// Invitation received by the data channel (`m=35`).
    Invitation { invitation: Invitation },

    /// A data channel connect attempt finished.
    DataOpened {
        identity: BotIdentity,
        result: Result<ChannelSession, BotError>,
        respond_to: oneshot::Sender<Result<(), BotError>>,
    },

    /// The lobby connect for an accepted invitation finished.
    LobbyOpened {
        generation: u64,
        invitation: Invitation,
        result: Result<ChannelSession, BotError>,
    },

    /// Race-end transition requested by a lobby session.
    EndRace {
        generation: u64,
        cause: &'static str,
        respond_to: oneshot::Sender<()>,
    },

    /// A session's read loop ended.
    SessionClosed {
        channel: ChannelKind,
        generation: u64,
        reason: CloseReason,
    },

    /// Stop every session and exit.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    /// A new roster arrived; replaces any earlier one.
    RosterReady(Vec<Contact>),
    /// Presence status changed.
    StatusChanged(BotStatus),
    /// Login exchange failed; the bot did not connect.
    LoginFailed(String),
    /// A lobby session opened for an accepted invitation.
    LobbyEntered { inviter_id: String },
    /// The lobby session ended.
    LobbyLeft,
    /// A channel closed or failed to open.
    ChannelClosed {
        channel: ChannelKind,
        reason: String,
    },
}
