//! Keepalive task for the data channel.
//!
//! Emits `{"m":37}` every interval, measured from task start rather than
//! from the last send. The task's token is a child of the data session's
//! token, so it never outlives the connection it writes to.

use super::channel::{FrameSink, Stoppable};
use crate::protocol::data;

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default heartbeat period.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to a running keepalive task.
#[derive(Debug)]
pub struct KeepaliveHandle {
    cancel_token: CancellationToken,
    task: JoinHandle<u64>,
}

impl KeepaliveHandle {
    /// Wait for the task to finish; yields the number of heartbeats sent.
    pub async fn join(self) -> u64 {
        self.task.await.unwrap_or(0)
    }
}

impl Stoppable for KeepaliveHandle {
    fn stop(&self) {
        self.cancel_token.cancel();
    }

    fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled() || self.task.is_finished()
    }
}

/// Periodic heartbeat emitter bound to one data session.
pub struct KeepaliveTask {
    sink: FrameSink,
    interval: Duration,
    first_tick: Instant,
    cancel_token: CancellationToken,
}

impl KeepaliveTask {
    /// Spawn the task against `sink`.
    #[must_use]
    pub fn spawn(sink: FrameSink, interval: Duration) -> KeepaliveHandle {
        let cancel_token = sink.child_token();
        let task = Self {
            sink,
            interval,
            first_tick: Instant::now() + interval,
            cancel_token: cancel_token.clone(),
        };

        KeepaliveHandle {
            cancel_token,
            task: tokio::spawn(task.run()),
        }
    }

    #[instrument(skip_all, name = "bot.keepalive", fields(interval_secs = self.interval.as_secs()))]
    async fn run(self) -> u64 {
        let frame = data::heartbeat();
        let mut ticker = tokio::time::interval_at(self.first_tick, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sent: u64 = 0;

        debug!(target: "bot.keepalive", "Keepalive started");

        loop {
            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sink.send(&frame).await {
                        warn!(target: "bot.keepalive", error = %e, "Heartbeat not sent, stopping");
                        break;
                    }
                    sent += 1;
                    debug!(target: "bot.keepalive", sent = sent, "Heartbeat sent");
                }
            }
        }

        info!(target: "bot.keepalive", heartbeats_sent = sent, "Keepalive stopped");
        sent
    }
}
