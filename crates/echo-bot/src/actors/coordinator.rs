//! `SessionCoordinator` - owner of all bot state.
//!
//! The coordinator is the only writer of the bot's identity, status,
//! selected contact, roster and lobby slot. Channel handlers reach it through
//! the [`AccountEvents`] and [`RaceControl`] links, which only post messages;
//! the coordinator never waits on a session task, so neither side can block
//! the other. Connects run in spawned tasks that post the opened session
//! back, so the mailbox keeps draining while a peer is slow to answer.
//!
//! # Lobby lifetime
//!
//! ```text
//! Idle --(invitation accepted)--> InLobby --(race end / peer close)--> Idle
//!   \______________________________|__________(shutdown)__________> Stopped
//! ```
//!
//! Each lobby session carries a generation number. Race-end requests and
//! close notifications from a session that is no longer current are ignored.

use crate::errors::BotError;
use crate::model::{BotIdentity, BotSnapshot, BotStatus, Contact, Invitation};
use crate::protocol::{data, ChannelKind};

use super::channel::{ChannelSession, CloseReason, FrameSink, SessionHandle, Stoppable};
use super::data::{AccountEvents, DataChannelHandler};
use super::lobby::{LobbyChannelHandler, LobbyContext, RaceControl};
use super::messages::{BotEvent, CoordinatorMessage};

use async_trait::async_trait;
use common::login::CredentialProvider;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox depth for the coordinator.
const COORDINATOR_CHANNEL_BUFFER: usize = 100;

/// Connection settings the coordinator needs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub game_host: String,
    pub data_port: u16,
    pub lobby_port: u16,
    pub client_version: String,
    pub keepalive_interval: Duration,
    pub connect_timeout: Duration,
    /// Contact selected automatically when a roster containing it arrives.
    pub follow_contact_id: Option<String>,
}

/// Join policy: accept only invitations from the selected contact while not
/// already in a lobby.
#[must_use]
pub fn accepts_invitation(selected: Option<&Contact>, in_lobby: bool, inviter_id: &str) -> bool {
    !in_lobby && selected.is_some_and(|contact| contact.id == inviter_id)
}

/// Handle to the `SessionCoordinator`.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    events: mpsc::Sender<BotEvent>,
    cancel_token: CancellationToken,
}

impl CoordinatorHandle {
    /// Spawn the coordinator. Events are delivered on `events`.
    #[must_use]
    pub fn spawn(config: CoordinatorConfig, events: mpsc::Sender<BotEvent>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionCoordinator {
            config,
            receiver,
            sender: sender.clone(),
            events: events.clone(),
            cancel_token: cancel_token.clone(),
            identity: None,
            status: BotStatus::INITIAL,
            in_lobby: false,
            selected: None,
            roster: Vec::new(),
            data: None,
            lobby: None,
            data_opening: false,
            lobby_opening: None,
            next_generation: 0,
        };

        let task = tokio::spawn(actor.run());

        (
            Self {
                sender,
                events,
                cancel_token,
            },
            task,
        )
    }

    /// Log in through `provider`, then open the data channel.
    ///
    /// # Errors
    ///
    /// - `BotError::Login` if the provider fails (a `LoginFailed` event is
    ///   emitted as well; login is never retried)
    /// - anything [`connect`](Self::connect) returns
    pub async fn start(&self, provider: &dyn CredentialProvider) -> Result<(), BotError> {
        let identity = match provider.credentials().await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(target: "bot.coordinator", error = %e, "Login failed");
                if self.events.try_send(BotEvent::LoginFailed(e.to_string())).is_err() {
                    debug!(target: "bot.coordinator", "LoginFailed event not delivered");
                }
                return Err(e.into());
            }
        };
        self.connect(identity).await
    }

    /// Open the data channel with an already issued identity.
    ///
    /// # Errors
    ///
    /// - `BotError::Connection` if the data channel cannot be opened
    /// - `BotError::InvalidState` if it is already open
    pub async fn connect(&self, identity: BotIdentity) -> Result<(), BotError> {
        self.request(|respond_to| CoordinatorMessage::Connect {
            identity,
            respond_to,
        })
        .await?
    }

    /// Select the contact whose invitations are accepted.
    ///
    /// # Errors
    ///
    /// Returns `BotError::InvalidState` while in a lobby with a different
    /// contact selected.
    pub async fn select_contact(&self, contact: Contact) -> Result<(), BotError> {
        self.request(|respond_to| CoordinatorMessage::SelectContact {
            contact,
            respond_to,
        })
        .await?
    }

    /// Forget the selected contact.
    ///
    /// # Errors
    ///
    /// Returns `BotError::InvalidState` while in a lobby.
    pub async fn clear_contact(&self) -> Result<(), BotError> {
        self.request(|respond_to| CoordinatorMessage::ClearContact { respond_to })
            .await?
    }

    /// Change presence status and report it on the data channel.
    ///
    /// # Errors
    ///
    /// Returns `BotError::InvalidStatus` for values outside 1..=3; nothing
    /// is changed in that case.
    pub async fn set_status(&self, value: i64) -> Result<(), BotError> {
        let status = BotStatus::new(value)?;
        self.request(|respond_to| CoordinatorMessage::SetStatus { status, respond_to })
            .await?
    }

    /// Copy of the current state.
    ///
    /// # Errors
    ///
    /// Returns `BotError::Stopped` after shutdown.
    pub async fn snapshot(&self) -> Result<BotSnapshot, BotError> {
        self.request(|respond_to| CoordinatorMessage::GetSnapshot { respond_to })
            .await
    }

    /// Most recent roster, in server order.
    ///
    /// # Errors
    ///
    /// Returns `BotError::Stopped` after shutdown.
    pub async fn roster(&self) -> Result<Vec<Contact>, BotError> {
        self.request(|respond_to| CoordinatorMessage::GetRoster { respond_to })
            .await
    }

    /// Stop every session and the coordinator. Safe to call repeatedly and
    /// concurrently with anything else.
    pub async fn shutdown(&self) {
        // Cancel first so pending connects give up without waiting for their
        // timeout.
        self.cancel_token.cancel();

        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(CoordinatorMessage::Shutdown { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMessage,
    ) -> Result<T, BotError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| self.unavailable(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| self.unavailable(format!("response receive failed: {e}")))
    }

    fn unavailable(&self, detail: String) -> BotError {
        if self.cancel_token.is_cancelled() {
            BotError::Stopped
        } else {
            BotError::Internal(detail)
        }
    }
}

/// Data handler -> coordinator.
struct AccountLink {
    sender: mpsc::Sender<CoordinatorMessage>,
}

#[async_trait]
impl AccountEvents for AccountLink {
    async fn roster_ready(&self, contacts: Vec<Contact>) {
        if self
            .sender
            .send(CoordinatorMessage::RosterReady { contacts })
            .await
            .is_err()
        {
            debug!(target: "bot.coordinator", "Coordinator gone, roster dropped");
        }
    }

    async fn invitation(&self, invitation: Invitation) {
        if self
            .sender
            .send(CoordinatorMessage::Invitation { invitation })
            .await
            .is_err()
        {
            debug!(target: "bot.coordinator", "Coordinator gone, invitation dropped");
        }
    }
}

/// Lobby handler -> coordinator, tagged with the session's generation.
struct LobbyLink {
    sender: mpsc::Sender<CoordinatorMessage>,
    generation: u64,
}

#[async_trait]
impl RaceControl for LobbyLink {
    async fn end_race(&self, cause: &'static str) {
        let (tx, rx) = oneshot::channel();
        let message = CoordinatorMessage::EndRace {
            generation: self.generation,
            cause,
            respond_to: tx,
        };
        if self.sender.send(message).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// A live session owned by the coordinator.
struct ActiveSession {
    handle: SessionHandle,
    sink: FrameSink,
    generation: u64,
}

/// The `SessionCoordinator` actor.
pub struct SessionCoordinator {
    config: CoordinatorConfig,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// Cloned into links and session watchers.
    sender: mpsc::Sender<CoordinatorMessage>,
    events: mpsc::Sender<BotEvent>,
    cancel_token: CancellationToken,
    identity: Option<BotIdentity>,
    status: BotStatus,
    in_lobby: bool,
    selected: Option<Contact>,
    roster: Vec<Contact>,
    data: Option<ActiveSession>,
    lobby: Option<ActiveSession>,
    /// A data connect is in flight.
    data_opening: bool,
    /// Generation reserved for the lobby connect in flight.
    lobby_opening: Option<u64>,
    next_generation: u64,
}

impl SessionCoordinator {
    #[instrument(skip_all, name = "bot.coordinator", fields(game_host = %self.config.game_host))]
    async fn run(mut self) {
        info!(target: "bot.coordinator", "Coordinator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "bot.coordinator", "Coordinator received cancellation signal");
                    self.stop_all();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if self.handle_message(message).await {
                                break;
                            }
                        }
                        None => {
                            self.stop_all();
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "bot.coordinator",
            roster_size = self.roster.len(),
            "Coordinator stopped"
        );
    }

    /// Handle a single message. Returns true if the coordinator should exit.
    async fn handle_message(&mut self, message: CoordinatorMessage) -> bool {
        match message {
            CoordinatorMessage::Connect {
                identity,
                respond_to,
            } => self.connect_data(identity, respond_to),

            CoordinatorMessage::SelectContact {
                contact,
                respond_to,
            } => {
                let _ = respond_to.send(self.select_contact(contact));
            }

            CoordinatorMessage::ClearContact { respond_to } => {
                let _ = respond_to.send(self.clear_contact());
            }

            CoordinatorMessage::SetStatus { status, respond_to } => {
                self.apply_status(status).await;
                let _ = respond_to.send(Ok(()));
            }

            CoordinatorMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            CoordinatorMessage::GetRoster { respond_to } => {
                let _ = respond_to.send(self.roster.clone());
            }

            CoordinatorMessage::RosterReady { contacts } => self.roster_ready(contacts),

            CoordinatorMessage::Invitation { invitation } => self.invitation(invitation),

            CoordinatorMessage::DataOpened {
                identity,
                result,
                respond_to,
            } => {
                let _ = respond_to.send(self.data_opened(identity, result));
            }

            CoordinatorMessage::LobbyOpened {
                generation,
                invitation,
                result,
            } => self.lobby_opened(generation, invitation, result),

            CoordinatorMessage::EndRace {
                generation,
                cause,
                respond_to,
            } => {
                if self.is_current_lobby(generation) {
                    self.end_race(cause).await;
                } else {
                    debug!(
                        target: "bot.coordinator",
                        generation = generation,
                        cause = cause,
                        "Ignoring race end from stale lobby session"
                    );
                }
                let _ = respond_to.send(());
            }

            CoordinatorMessage::SessionClosed {
                channel,
                generation,
                reason,
            } => self.session_closed(channel, generation, &reason),

            CoordinatorMessage::Shutdown { respond_to } => {
                self.stop_all();
                let _ = respond_to.send(());
                return true;
            }
        }

        false
    }

    fn connect_data(
        &mut self,
        identity: BotIdentity,
        respond_to: oneshot::Sender<Result<(), BotError>>,
    ) {
        if self.data.is_some() || self.data_opening {
            let _ = respond_to.send(Err(BotError::InvalidState(
                "data channel already connected".to_string(),
            )));
            return;
        }

        self.data_opening = true;
        let host = self.config.game_host.clone();
        let port = self.config.data_port;
        self.open_in_background(ChannelKind::Data, host, port, move |result| {
            CoordinatorMessage::DataOpened {
                identity,
                result,
                respond_to,
            }
        });
    }

    fn data_opened(
        &mut self,
        identity: BotIdentity,
        result: Result<ChannelSession, BotError>,
    ) -> Result<(), BotError> {
        self.data_opening = false;
        let session = match result {
            Ok(session) => session,
            Err(e) => {
                self.emit(BotEvent::ChannelClosed {
                    channel: ChannelKind::Data,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let handler = DataChannelHandler::new(
            identity.clone(),
            self.config.client_version.clone(),
            self.config.keepalive_interval,
            Box::new(AccountLink {
                sender: self.sender.clone(),
            }),
        );
        let running = session.start(handler);
        let generation = self.bump_generation();
        self.watch(ChannelKind::Data, generation, running.task);

        info!(target: "bot.coordinator", bot_id = %identity.id, "Data channel connected");
        self.identity = Some(identity);
        self.data = Some(ActiveSession {
            handle: running.handle,
            sink: running.sink,
            generation,
        });
        Ok(())
    }

    fn select_contact(&mut self, contact: Contact) -> Result<(), BotError> {
        if self.in_lobby && self.selected.as_ref() != Some(&contact) {
            return Err(BotError::InvalidState(
                "cannot change contact while in a lobby".to_string(),
            ));
        }
        info!(target: "bot.coordinator", contact_id = %contact.id, "Contact selected");
        self.selected = Some(contact);
        Ok(())
    }

    fn clear_contact(&mut self) -> Result<(), BotError> {
        if self.in_lobby && self.selected.is_some() {
            return Err(BotError::InvalidState(
                "cannot clear contact while in a lobby".to_string(),
            ));
        }
        self.selected = None;
        Ok(())
    }

    fn snapshot(&self) -> BotSnapshot {
        BotSnapshot {
            bot_id: self.identity.as_ref().map(|identity| identity.id.clone()),
            status: self.status,
            in_lobby: self.in_lobby,
            selected_contact: self.selected.clone(),
            data_connected: self.data.is_some(),
        }
    }

    fn roster_ready(&mut self, contacts: Vec<Contact>) {
        self.roster.clone_from(&contacts);
        self.emit(BotEvent::RosterReady(contacts));

        let Some(follow_id) = self.config.follow_contact_id.as_deref() else {
            return;
        };
        if self.selected.is_some() || self.in_lobby {
            return;
        }
        if let Some(contact) = self.roster.iter().find(|c| c.id == follow_id).cloned() {
            info!(target: "bot.coordinator", contact_id = %contact.id, "Following configured contact");
            self.selected = Some(contact);
        } else {
            debug!(target: "bot.coordinator", follow_id = %follow_id, "Configured contact not in roster");
        }
    }

    fn invitation(&mut self, invitation: Invitation) {
        let busy = self.in_lobby || self.lobby_opening.is_some();
        if !accepts_invitation(self.selected.as_ref(), busy, &invitation.inviter_id) {
            debug!(
                target: "bot.coordinator",
                inviter_id = %invitation.inviter_id,
                in_lobby = self.in_lobby,
                lobby_opening = self.lobby_opening.is_some(),
                "Invitation discarded"
            );
            return;
        }

        if self.identity.is_none() {
            debug!(target: "bot.coordinator", "Invitation before login, discarded");
            return;
        }

        let generation = self.bump_generation();
        self.lobby_opening = Some(generation);
        let host = invitation.ip.clone();
        let port = self.config.lobby_port;
        self.open_in_background(ChannelKind::Lobby, host, port, move |result| {
            CoordinatorMessage::LobbyOpened {
                generation,
                invitation,
                result,
            }
        });
    }

    fn lobby_opened(
        &mut self,
        generation: u64,
        invitation: Invitation,
        result: Result<ChannelSession, BotError>,
    ) {
        if self.lobby_opening != Some(generation) {
            debug!(target: "bot.coordinator", generation = generation, "Stale lobby connect dropped");
            return;
        }
        self.lobby_opening = None;

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    target: "bot.coordinator",
                    ip = %invitation.ip,
                    error = %e,
                    error_kind = e.error_kind(),
                    "Lobby connection failed"
                );
                self.emit(BotEvent::ChannelClosed {
                    channel: ChannelKind::Lobby,
                    reason: e.to_string(),
                });
                return;
            }
        };

        let Some(bot_id) = self.identity.as_ref().map(|identity| identity.id.clone()) else {
            return;
        };
        let context = LobbyContext::new(
            invitation.ip.clone(),
            self.config.lobby_port,
            invitation.token,
        );
        let handler = LobbyChannelHandler::new(
            bot_id,
            context,
            Box::new(LobbyLink {
                sender: self.sender.clone(),
                generation,
            }),
        );
        let running = session.start(handler);
        self.watch(ChannelKind::Lobby, generation, running.task);

        self.in_lobby = true;
        self.lobby = Some(ActiveSession {
            handle: running.handle,
            sink: running.sink,
            generation,
        });

        info!(
            target: "bot.coordinator",
            inviter_id = %invitation.inviter_id,
            generation = generation,
            "Lobby entered"
        );
        self.emit(BotEvent::LobbyEntered {
            inviter_id: invitation.inviter_id,
        });
    }

    /// Race-end transition: leave the lobby, go idle, stop the lobby session.
    async fn end_race(&mut self, cause: &'static str) {
        self.in_lobby = false;
        self.apply_status(BotStatus::IDLE).await;
        if let Some(lobby) = self.lobby.take() {
            lobby.handle.stop();
        }
        info!(target: "bot.coordinator", cause = cause, "Race ended");
        self.emit(BotEvent::LobbyLeft);
    }

    fn session_closed(&mut self, channel: ChannelKind, generation: u64, reason: &CloseReason) {
        match channel {
            ChannelKind::Lobby => {
                if !self.is_current_lobby(generation) {
                    return;
                }
                self.lobby = None;
                self.in_lobby = false;
                info!(target: "bot.coordinator", reason = %reason, "Lobby closed by peer");
                self.emit(BotEvent::LobbyLeft);
            }
            ChannelKind::Data => {
                if self.data.as_ref().map(|d| d.generation) != Some(generation) {
                    return;
                }
                self.data = None;
                warn!(target: "bot.coordinator", reason = %reason, "Data channel closed");
            }
        }

        self.emit(BotEvent::ChannelClosed {
            channel,
            reason: reason.to_string(),
        });
    }

    async fn apply_status(&mut self, status: BotStatus) {
        self.status = status;
        if let Some(data) = &self.data {
            if let Err(e) = data.sink.send(&data::status_update(status)).await {
                warn!(target: "bot.coordinator", error = %e, "Status update not sent");
            }
        }
        debug!(target: "bot.coordinator", status = %status, "Status changed");
        self.emit(BotEvent::StatusChanged(status));
    }

    fn stop_all(&mut self) {
        if let Some(lobby) = self.lobby.take() {
            lobby.handle.stop();
        }
        if let Some(data) = self.data.take() {
            data.handle.stop();
        }
        self.in_lobby = false;
        self.lobby_opening = None;
        self.data_opening = false;
        self.cancel_token.cancel();
        info!(target: "bot.coordinator", "All sessions stopped");
    }

    fn is_current_lobby(&self, generation: u64) -> bool {
        self.lobby.as_ref().map(|l| l.generation) == Some(generation)
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Connect on a spawned task and post the outcome back through `done`.
    /// The session token is a child of ours, so shutdown aborts the connect.
    fn open_in_background(
        &self,
        kind: ChannelKind,
        host: String,
        port: u16,
        done: impl FnOnce(Result<ChannelSession, BotError>) -> CoordinatorMessage + Send + 'static,
    ) {
        let sender = self.sender.clone();
        let connect_timeout = self.config.connect_timeout;
        let cancel_token = self.cancel_token.child_token();
        tokio::spawn(async move {
            let result = ChannelSession::open(kind, &host, port, connect_timeout, cancel_token).await;
            if sender.send(done(result)).await.is_err() {
                debug!(target: "bot.coordinator", channel = %kind, "Coordinator gone, connect result dropped");
            }
        });
    }

    fn watch(&self, channel: ChannelKind, generation: u64, task: JoinHandle<CloseReason>) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let reason = task
                .await
                .unwrap_or_else(|e| CloseReason::Io(format!("session task failed: {e}")));
            let _ = sender
                .send(CoordinatorMessage::SessionClosed {
                    channel,
                    generation,
                    reason,
                })
                .await;
        });
    }

    fn emit(&self, event: BotEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(target: "bot.coordinator", event = ?event, "Event channel full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(target: "bot.coordinator", "Event receiver gone");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use bot_test_utils::StalledListener;
    use common::login::{LoginError, StaticCredentials};
    use tokio::net::TcpListener;

    fn test_config(data_port: u16) -> CoordinatorConfig {
        CoordinatorConfig {
            game_host: "127.0.0.1".to_string(),
            data_port,
            lobby_port: 1,
            client_version: "2.4".to_string(),
            keepalive_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(1),
            follow_contact_id: None,
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    struct FailingLogin;

    #[async_trait]
    impl CredentialProvider for FailingLogin {
        async fn credentials(&self) -> Result<BotIdentity, LoginError> {
            Err(LoginError::BadCredentials {
                email: "bot@example.com".to_string(),
            })
        }
    }

    #[test]
    fn test_accepts_invitation_policy() {
        let alice = Contact::new("id1", "Alice");

        assert!(accepts_invitation(Some(&alice), false, "id1"));
        assert!(!accepts_invitation(Some(&alice), true, "id1"));
        assert!(!accepts_invitation(Some(&alice), false, "id2"));
        assert!(!accepts_invitation(None, false, "id1"));
        assert!(!accepts_invitation(None, true, "id1"));
    }

    #[tokio::test]
    async fn test_initial_snapshot() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (handle, _task) = CoordinatorHandle::spawn(test_config(1), events_tx);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.bot_id, None);
        assert_eq!(snapshot.status, BotStatus::INITIAL);
        assert!(!snapshot.in_lobby);
        assert!(snapshot.selected_contact.is_none());
        assert!(!snapshot.data_connected);
        assert!(handle.roster().await.unwrap().is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_status_validates() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (handle, _task) = CoordinatorHandle::spawn(test_config(1), events_tx);

        assert!(matches!(
            handle.set_status(4).await,
            Err(BotError::InvalidStatus(4))
        ));
        assert!(matches!(
            handle.set_status(0).await,
            Err(BotError::InvalidStatus(0))
        ));
        assert_eq!(handle.snapshot().await.unwrap().status, BotStatus::INITIAL);

        handle.set_status(2).await.unwrap();
        assert_eq!(
            events_rx.recv().await.unwrap(),
            BotEvent::StatusChanged(BotStatus::new(2).unwrap())
        );
        assert_eq!(handle.snapshot().await.unwrap().status.value(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_select_and_clear_contact() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (handle, _task) = CoordinatorHandle::spawn(test_config(1), events_tx);

        handle
            .select_contact(Contact::new("id1", "Alice"))
            .await
            .unwrap();
        assert_eq!(
            handle.snapshot().await.unwrap().selected_contact,
            Some(Contact::new("id1", "Alice"))
        );

        handle.clear_contact().await.unwrap();
        assert!(handle.snapshot().await.unwrap().selected_contact.is_none());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_refused_reports_channel_closed() {
        let port = closed_port().await;
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (handle, _task) = CoordinatorHandle::spawn(test_config(port), events_tx);

        let result = handle
            .connect(BotIdentity::new("bot-1", "tok"))
            .await;
        assert!(matches!(result, Err(BotError::Connection(_))));

        let event = events_rx.recv().await.unwrap();
        assert!(matches!(
            event,
            BotEvent::ChannelClosed {
                channel: ChannelKind::Data,
                ..
            }
        ));
        assert!(!handle.snapshot().await.unwrap().data_connected);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_reports_login_failure() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (handle, _task) = CoordinatorHandle::spawn(test_config(1), events_tx);

        let result = handle.start(&FailingLogin).await;
        assert!(matches!(result, Err(BotError::Login(_))));
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            BotEvent::LoginFailed(_)
        ));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_with_static_credentials_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (handle, _task) = CoordinatorHandle::spawn(test_config(port), events_tx);

        let provider = StaticCredentials::new(BotIdentity::new("bot-9", "tok"));
        let (result, accepted) = tokio::join!(handle.start(&provider), listener.accept());
        result.unwrap();
        let _peer = accepted.unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.bot_id.as_deref(), Some("bot-9"));
        assert!(snapshot.data_connected);

        // A second connect is rejected.
        assert!(matches!(
            handle.connect(BotIdentity::new("bot-9", "tok")).await,
            Err(BotError::InvalidState(_))
        ));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (handle, task) = CoordinatorHandle::spawn(test_config(1), events_tx);

        handle.shutdown().await;
        assert!(handle.is_shut_down());
        handle.shutdown().await;

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(handle.snapshot().await, Err(BotError::Stopped)));
        assert!(matches!(
            handle.set_status(1).await,
            Err(BotError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_shutdown() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (handle, task) = CoordinatorHandle::spawn(test_config(1), events_tx);

        let a = handle.clone();
        let b = handle.clone();
        tokio::join!(a.shutdown(), b.shutdown(), handle.shutdown());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_connect() {
        let stalled = StalledListener::bind().await;
        let mut config = test_config(stalled.port());
        config.connect_timeout = Duration::from_secs(10);
        let (events_tx, _events_rx) = mpsc::channel(16);
        let (handle, task) = CoordinatorHandle::spawn(config, events_tx);

        let connecting = tokio::spawn({
            let handle = handle.clone();
            async move { handle.connect(BotIdentity::new("bot-1", "tok")).await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The mailbox keeps answering while the connect hangs.
        let snapshot = tokio::time::timeout(Duration::from_secs(1), handle.snapshot())
            .await
            .expect("snapshot should not wait for the connect")
            .unwrap();
        assert!(!snapshot.data_connected);
        assert!(matches!(
            handle.connect(BotIdentity::new("bot-1", "tok")).await,
            Err(BotError::InvalidState(_))
        ));

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("shutdown should not wait for the connect");
        let result = tokio::time::timeout(Duration::from_secs(1), connecting)
            .await
            .expect("connect should give up on shutdown")
            .unwrap();
        assert!(matches!(result, Err(BotError::Stopped)));

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
