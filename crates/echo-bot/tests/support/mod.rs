//! Shared harness for coordinator integration tests.

#![allow(dead_code)]

use std::time::Duration;

use bot_test_utils::{fixtures, MockGameServer, MockPeer};
use common::login::StaticCredentials;
use echo_bot::actors::{BotEvent, CoordinatorConfig, CoordinatorHandle};
use echo_bot::config::Config;
use echo_bot::model::BotIdentity;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const BOT_ID: &str = "P";
pub const AUTH_TOKEN: &str = "A";

/// Keepalive period short enough to observe in real time.
pub const TEST_KEEPALIVE: Duration = Duration::from_millis(200);

pub struct Harness {
    pub data_server: MockGameServer,
    pub lobby_server: MockGameServer,
    pub coordinator: CoordinatorHandle,
    pub task: JoinHandle<()>,
    pub events: mpsc::Receiver<BotEvent>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Build a harness, letting the test adjust the coordinator settings.
    pub async fn with_config(adjust: impl FnOnce(&mut CoordinatorConfig)) -> Self {
        let data_server = MockGameServer::bind().await;
        let lobby_server = MockGameServer::bind().await;

        let vars = fixtures::local_config_vars(data_server.port(), lobby_server.port());
        let mut config = Config::from_vars(&vars)
            .expect("local config should load")
            .coordinator_config();
        config.keepalive_interval = TEST_KEEPALIVE;
        adjust(&mut config);

        let (events_tx, events) = mpsc::channel(64);
        let (coordinator, task) = CoordinatorHandle::spawn(config, events_tx);

        Self {
            data_server,
            lobby_server,
            coordinator,
            task,
            events,
        }
    }

    /// Log in with a static identity and accept the data connection.
    pub async fn connect(&self) -> MockPeer {
        let provider = StaticCredentials::new(BotIdentity::new(BOT_ID, AUTH_TOKEN));
        self.coordinator
            .start(&provider)
            .await
            .expect("bot should connect");
        self.data_server.accept().await
    }

    /// Wait for the first event matching `matches`, skipping others.
    pub async fn next_event(&mut self, matches: impl Fn(&BotEvent) -> bool) -> BotEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}
