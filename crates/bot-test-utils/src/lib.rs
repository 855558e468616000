//! # Bot Test Utilities
//!
//! Shared test utilities for the Echo Bot.
//!
//! - `mock_server` - TCP line server standing in for the game's data and
//!   lobby endpoints
//! - `fixtures` - Inbound frames and configuration variables
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bot_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = MockGameServer::bind().await;
//!     // point the bot at server.port() ...
//!     let mut peer = server.accept().await;
//!
//!     peer.send_json(&fixtures::challenge()).await;
//!     let reply = peer.recv_json().await;
//!     assert_eq!(reply["m"], 1);
//! }
//! ```

pub mod fixtures;
pub mod mock_server;

pub use mock_server::*;
