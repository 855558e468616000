//! `LobbyChannelHandler` - dispatch for one in-race lobby session.
//!
//! Echoes the bot's movement and deaths back to the lobby server using the
//! reconstructed server clock, and hands race-end transitions to the
//! coordinator through [`RaceControl`]. Timed replies (countdown, rejoin)
//! race the session token and give up as soon as the session stops.

use super::channel::{FrameHandler, FrameSink};
use super::clock::ClockSync;
use crate::protocol::lobby::{self, LobbyMessage};
use crate::protocol::Frame;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Number of `[19]` replies to a countdown.
pub const COUNTDOWN_REPLIES: usize = 4;

/// Spacing between countdown replies.
pub const COUNTDOWN_SPACING: Duration = Duration::from_secs(1);

/// Delay before the rejoin request after "7".
pub const REJOIN_DELAY: Duration = Duration::from_secs(1);

/// Race-end requests from a lobby session.
#[async_trait]
pub trait RaceControl: Send + Sync {
    /// Run the race-end transition. Returns once the coordinator has applied
    /// it (or is gone).
    async fn end_race(&self, cause: &'static str);
}

/// State owned by one lobby session.
#[derive(Debug, Clone)]
pub struct LobbyContext {
    pub ip: String,
    pub port: u16,
    pub token: Value,
    quick_race: bool,
    clock: ClockSync,
}

impl LobbyContext {
    /// Quick race flag starts set; the clock starts at 0 anchored now.
    #[must_use]
    pub fn new(ip: impl Into<String>, port: u16, token: Value) -> Self {
        Self {
            ip: ip.into(),
            port,
            token,
            quick_race: true,
            clock: ClockSync::new(),
        }
    }

    #[must_use]
    pub fn quick_race(&self) -> bool {
        self.quick_race
    }

    #[must_use]
    pub fn current_server_time(&self) -> i64 {
        self.clock.current_server_time()
    }
}

pub struct LobbyChannelHandler {
    bot_id: String,
    context: LobbyContext,
    race: Box<dyn RaceControl>,
}

impl LobbyChannelHandler {
    #[must_use]
    pub fn new(bot_id: impl Into<String>, context: LobbyContext, race: Box<dyn RaceControl>) -> Self {
        Self {
            bot_id: bot_id.into(),
            context,
            race,
        }
    }

    async fn dispatch(&mut self, message: LobbyMessage, sink: &FrameSink) {
        match message {
            LobbyMessage::Countdown => countdown(sink).await,
            LobbyMessage::RaceOver => {
                self.race.end_race(lobby::TAG_RACE_OVER).await;
                rejoin(sink).await;
            }
            LobbyMessage::Death {
                respawn_delay,
                killer_id,
                power_up,
                hit_type,
            } => {
                let respawn_time = respawn_delay.saturating_add(self.context.current_server_time());
                reply(
                    sink,
                    lobby::death_ack(respawn_time, killer_id, power_up, hit_type),
                )
                .await;
            }
            LobbyMessage::Ping(payload) => reply(sink, lobby::pong(payload)).await,
            LobbyMessage::ClockSync(server_time) => {
                self.context.clock.sync(server_time);
                debug!(target: "bot.lobby", server_time = server_time, "Server clock synced");
            }
            LobbyMessage::Movement { x, y, vx, vy } => {
                let now = self.context.current_server_time();
                reply(sink, lobby::movement_echo(now, x, y, vx, vy)).await;
            }
            LobbyMessage::RaceFinished => self.race.end_race(lobby::TAG_RACE_FINISHED).await,
            LobbyMessage::QuickRace(set) => {
                self.context.quick_race = set;
                debug!(target: "bot.lobby", quick_race = set, "Quick race flag updated");
                if set {
                    self.race.end_race(lobby::TAG_QUICK_RACE).await;
                }
            }
            LobbyMessage::QuickRaceEnd => {
                if self.context.quick_race {
                    self.race.end_race(lobby::TAG_QUICK_RACE_END).await;
                }
            }
            LobbyMessage::Join(counter) => {
                reply(
                    sink,
                    lobby::join_reply(counter, &self.bot_id, &self.context.token),
                )
                .await;
            }
            LobbyMessage::NotForBot(tag) => {
                debug!(target: "bot.lobby", tag = %tag, "Event for another player");
            }
            LobbyMessage::Unknown(tag) => {
                debug!(target: "bot.lobby", tag = %tag, "Unhandled lobby tag");
            }
        }
    }
}

#[async_trait]
impl FrameHandler for LobbyChannelHandler {
    async fn handle(&mut self, frame: Frame, sink: &FrameSink) {
        let Some(items) = frame.as_array() else {
            debug!(target: "bot.lobby", shape = frame.shape(), "Ignoring non-array frame");
            return;
        };

        match LobbyMessage::parse(items) {
            Ok(message) => self.dispatch(message, sink).await,
            Err(e) => warn!(target: "bot.lobby", error = %e, "Ignoring lobby frame"),
        }
    }
}

async fn reply(sink: &FrameSink, frame: Frame) {
    if let Err(e) = sink.send(&frame).await {
        debug!(target: "bot.lobby", error = %e, "Reply dropped");
    }
}

/// Sleep for `delay` unless the session stops first. Returns whether the
/// full delay elapsed with the session still live.
async fn sleep_while_live(sink: &FrameSink, delay: Duration) -> bool {
    tokio::select! {
        biased;
        () = sink.closed() => false,
        () = tokio::time::sleep(delay) => !sink.is_closed(),
    }
}

async fn countdown(sink: &FrameSink) {
    let ack = lobby::countdown_ack();
    for sent in 0..COUNTDOWN_REPLIES {
        if !sleep_while_live(sink, COUNTDOWN_SPACING).await {
            debug!(target: "bot.lobby", sent = sent, "Countdown interrupted");
            return;
        }
        if sink.send(&ack).await.is_err() {
            return;
        }
    }
    info!(target: "bot.lobby", "Countdown acknowledged");
}

async fn rejoin(sink: &FrameSink) {
    if sleep_while_live(sink, REJOIN_DELAY).await {
        reply(sink, lobby::rejoin_request()).await;
        info!(target: "bot.lobby", "Rejoin requested");
    } else {
        debug!(target: "bot.lobby", "Session closed before rejoin, request dropped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::channel::{DetachedSink, SessionHandle, Stoppable};
    use crate::protocol::ChannelKind;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Records race-end causes and, like the coordinator, stops the session.
    #[derive(Clone)]
    struct RecordingRace {
        causes: Arc<Mutex<Vec<&'static str>>>,
        session: SessionHandle,
    }

    #[async_trait]
    impl RaceControl for RecordingRace {
        async fn end_race(&self, cause: &'static str) {
            self.causes.lock().unwrap().push(cause);
            self.session.stop();
        }
    }

    struct Fixture {
        handler: LobbyChannelHandler,
        detached: DetachedSink,
        causes: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let detached = FrameSink::detached(ChannelKind::Lobby);
            let causes = Arc::new(Mutex::new(Vec::new()));
            let race = RecordingRace {
                causes: Arc::clone(&causes),
                session: detached.handle.clone(),
            };
            let handler = LobbyChannelHandler::new(
                "bot-1",
                LobbyContext::new("10.0.0.5", 6789, json!(4711)),
                Box::new(race),
            );
            Self {
                handler,
                detached,
                causes,
            }
        }

        async fn feed(&mut self, value: serde_json::Value) {
            let frame = Frame::try_from(value).unwrap();
            self.handler.handle(frame, &self.detached.sink).await;
        }

        fn causes(&self) -> Vec<&'static str> {
            self.causes.lock().unwrap().clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_uses_clock_at_reply_time() {
        let mut fx = Fixture::new();

        fx.feed(json!(["17", 1_000_000_000_i64])).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        fx.feed(json!(["13", 1, 500, 77, 2, 9, 3])).await;

        assert_eq!(fx.detached.drain_json(), vec![json!([9, 3500, 77, 2, 0, 3])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_of_other_player_ignored() {
        let mut fx = Fixture::new();
        fx.feed(json!(["13", 0, 500, 77, 2, 9, 3])).await;
        fx.feed(json!(["13", 1, 500])).await;
        assert!(fx.detached.drain_json().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_movement_echo() {
        let mut fx = Fixture::new();
        tokio::time::advance(Duration::from_millis(250)).await;

        fx.feed(json!(["18", 1, 10, 20, 3, -4])).await;
        fx.feed(json!(["18", 2, 10, 20, 3, -4])).await;

        assert_eq!(fx.detached.drain_json(), vec![json!([3, 250, 10, 20, 3, -4])]);
    }

    #[tokio::test]
    async fn test_ping_and_join_replies() {
        let mut fx = Fixture::new();

        fx.feed(json!(["16", 42])).await;
        fx.feed(json!(["39", "c-7"])).await;

        assert_eq!(
            fx.detached.drain_json(),
            vec![
                json!([4, 42]),
                json!({"a": "c-7", "p": "bot-1", "m": 5, "t": 4, "g": 4711}),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_sends_four_acks_one_second_apart() {
        let mut fx = Fixture::new();
        let start = tokio::time::Instant::now();

        fx.feed(json!(["5"])).await;

        assert_eq!(start.elapsed(), Duration::from_secs(4));
        assert_eq!(fx.detached.drain_json(), vec![json!([19]); 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_aborts_when_session_stops() {
        let fx = Fixture::new();
        let Fixture {
            mut handler,
            mut detached,
            ..
        } = fx;
        let sink = detached.sink.clone();
        let session = detached.handle.clone();

        let task = tokio::spawn(async move {
            handler
                .handle(Frame::try_from(json!(["5"])).unwrap(), &sink)
                .await;
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        session.stop();
        task.await.unwrap();

        assert_eq!(detached.drain_json(), vec![json!([19]); 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_over_drops_rejoin_after_race_end() {
        let mut fx = Fixture::new();

        fx.feed(json!(["7"])).await;

        assert_eq!(fx.causes(), vec!["7"]);
        assert!(fx.detached.sink.is_closed());
        assert!(fx.detached.drain_json().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_sent_when_session_survives() {
        // A stale generation: the coordinator ignores it and the session stays open.
        let mut detached = FrameSink::detached(ChannelKind::Lobby);
        let mut handler = LobbyChannelHandler::new(
            "bot-1",
            LobbyContext::new("10.0.0.5", 6789, json!(1)),
            Box::new(NoopRace),
        );

        let start = tokio::time::Instant::now();
        handler
            .handle(Frame::try_from(json!(["7"])).unwrap(), &detached.sink)
            .await;

        assert_eq!(start.elapsed(), REJOIN_DELAY);
        assert_eq!(detached.drain_json(), vec![json!([16])]);
    }

    struct NoopRace;

    #[async_trait]
    impl RaceControl for NoopRace {
        async fn end_race(&self, _cause: &'static str) {}
    }

    #[tokio::test]
    async fn test_race_finished_ends_race_without_rejoin() {
        let mut fx = Fixture::new();
        fx.feed(json!(["28"])).await;
        assert_eq!(fx.causes(), vec!["28"]);
        assert!(fx.detached.drain_json().is_empty());
    }

    #[tokio::test]
    async fn test_quick_race_flag() {
        let mut fx = Fixture::new();
        assert!(fx.handler.context.quick_race());

        fx.feed(json!(["30", 0])).await;
        assert!(!fx.handler.context.quick_race());
        fx.feed(json!(["35"])).await;
        assert!(fx.causes().is_empty());

        fx.feed(json!(["30", 1])).await;
        assert!(fx.handler.context.quick_race());
        assert_eq!(fx.causes(), vec!["30"]);
    }

    #[tokio::test]
    async fn test_quick_race_end_honours_initial_flag() {
        let mut fx = Fixture::new();
        fx.feed(json!(["35"])).await;
        assert_eq!(fx.causes(), vec!["35"]);
    }

    #[tokio::test]
    async fn test_unknown_and_object_frames_ignored() {
        let mut fx = Fixture::new();
        fx.feed(json!(["99", 1, 2])).await;
        fx.feed(json!({"m": 1})).await;
        fx.feed(json!([])).await;
        assert!(fx.detached.drain_json().is_empty());
        assert!(fx.causes().is_empty());
    }
}
