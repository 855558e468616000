//! Actor model for the echo bot.
//!
//! ```text
//! SessionCoordinator (one per bot, owns all bot state)
//! ├── data ChannelSession ── DataChannelHandler
//! │                          └── KeepaliveTask
//! └── lobby ChannelSession ── LobbyChannelHandler (at most one)
//! ```
//!
//! Cancellation flows downward: the coordinator's token is the parent of
//! every session token, and the keepalive hangs off the data session.
//! Handlers talk upward only through messages.

pub mod channel;
pub mod clock;
pub mod coordinator;
pub mod data;
pub mod keepalive;
pub mod lobby;
pub mod messages;

pub use channel::{
    ChannelMetrics, ChannelSession, CloseReason, FrameHandler, FrameSink, RunningSession,
    SessionHandle, Stoppable,
};
pub use clock::ClockSync;
pub use coordinator::{accepts_invitation, CoordinatorConfig, CoordinatorHandle};
pub use data::{AccountEvents, DataChannelHandler};
pub use keepalive::{KeepaliveHandle, KeepaliveTask, DEFAULT_KEEPALIVE_INTERVAL};
pub use lobby::{LobbyChannelHandler, LobbyContext, RaceControl};
pub use messages::{BotEvent, CoordinatorMessage};
