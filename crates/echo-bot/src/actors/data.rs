//! `DataChannelHandler` - dispatch for the account/data channel.
//!
//! | m  | action |
//! |----|--------|
//! | 1  | roster, forwarded once per frame |
//! | 35 | invitation, forwarded to the join policy |
//! | 51 | challenge reply; first one also starts the keepalive |
//!
//! Anything else is logged at debug and ignored.

use super::channel::{CloseReason, FrameHandler, FrameSink, Stoppable};
use super::keepalive::{KeepaliveHandle, KeepaliveTask};
use crate::model::{BotIdentity, Contact, Invitation};
use crate::protocol::data::{self, DataMessage};
use crate::protocol::Frame;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the data channel reports upward.
#[async_trait]
pub trait AccountEvents: Send + Sync {
    /// A roster frame arrived, entries in input order.
    async fn roster_ready(&self, contacts: Vec<Contact>);

    /// A lobby invitation arrived.
    async fn invitation(&self, invitation: Invitation);
}

pub struct DataChannelHandler {
    identity: BotIdentity,
    client_version: String,
    keepalive_interval: Duration,
    events: Box<dyn AccountEvents>,
    keepalive: Option<KeepaliveHandle>,
}

impl DataChannelHandler {
    #[must_use]
    pub fn new(
        identity: BotIdentity,
        client_version: impl Into<String>,
        keepalive_interval: Duration,
        events: Box<dyn AccountEvents>,
    ) -> Self {
        Self {
            identity,
            client_version: client_version.into(),
            keepalive_interval,
            events,
            keepalive: None,
        }
    }

    /// Whether a keepalive task has been started and is still running.
    #[must_use]
    pub fn keepalive_running(&self) -> bool {
        self.keepalive.as_ref().is_some_and(|k| !k.is_stopped())
    }

    async fn answer_challenge(&mut self, sink: &FrameSink) {
        let reply = data::challenge_reply(&self.identity, &self.client_version);
        if let Err(e) = sink.send(&reply).await {
            warn!(target: "bot.data", error = %e, "Failed to answer challenge");
            return;
        }
        info!(target: "bot.data", bot_id = %self.identity.id, "Challenge answered");

        if self.keepalive.is_some() {
            debug!(target: "bot.data", "Keepalive already running, not starting another");
            return;
        }
        self.keepalive = Some(KeepaliveTask::spawn(sink.clone(), self.keepalive_interval));
    }
}

#[async_trait]
impl FrameHandler for DataChannelHandler {
    async fn handle(&mut self, frame: Frame, sink: &FrameSink) {
        let Some(object) = frame.as_object() else {
            debug!(target: "bot.data", shape = frame.shape(), "Ignoring non-object frame");
            return;
        };

        match DataMessage::parse(object) {
            Ok(DataMessage::Roster { contacts, skipped }) => {
                if skipped > 0 {
                    warn!(target: "bot.data", skipped = skipped, "Roster entries without id or name skipped");
                }
                info!(target: "bot.data", contacts = contacts.len(), "Roster received");
                self.events.roster_ready(contacts).await;
            }
            Ok(DataMessage::Invitation(invitation)) => {
                info!(
                    target: "bot.data",
                    inviter_id = %invitation.inviter_id,
                    ip = %invitation.ip,
                    "Lobby invitation received"
                );
                self.events.invitation(invitation).await;
            }
            Ok(DataMessage::Challenge) => self.answer_challenge(sink).await,
            Ok(DataMessage::Other(kind)) => {
                debug!(target: "bot.data", m = kind, "Ignoring data message");
            }
            Err(e) => {
                warn!(target: "bot.data", error = %e, "Ignoring data frame");
            }
        }
    }

    async fn on_close(&mut self, reason: &CloseReason) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.stop();
            let sent = keepalive.join().await;
            debug!(
                target: "bot.data",
                reason = %reason,
                heartbeats_sent = sent,
                "Keepalive stopped with data channel"
            );
        }
    }
}
