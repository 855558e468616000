//! Echo Bot Library
//!
//! An automated client for a multiplayer racing game. The bot logs in, keeps
//! the account data channel alive, joins lobbies its selected contact invites
//! it to, and keeps the lobby session alive by echoing what the server
//! expects a player to echo.
//!
//! # Architecture
//!
//! ```text
//! CoordinatorHandle ──► SessionCoordinator (owns all bot state)
//!                       ├── data ChannelSession  (host:6689, m-keyed objects)
//!                       │   └── KeepaliveTask    ({"m":37} every 30s)
//!                       └── lobby ChannelSession (invite ip:6789, tagged arrays)
//! ```
//!
//! Both channels carry one JSON value per line in each direction. Channel
//! handlers never touch shared state directly; they post messages to the
//! coordinator, which applies the join policy and the race-end transition.
//!
//! # Modules
//!
//! - [`actors`] - Coordinator, channel sessions, keepalive
//! - [`config`] - Configuration from environment
//! - [`console`] - Operator commands and event rendering for the binary
//! - [`errors`] - Error types with log labels
//! - [`model`] - Contacts, status, invitations, snapshots
//! - [`protocol`] - Frame classification and message builders

pub mod actors;
pub mod config;
pub mod console;
pub mod errors;
pub mod model;
pub mod protocol;
