//! `ChannelSession` - one line-delimited JSON socket.
//!
//! Each session owns exactly one TCP connection and runs two tasks:
//! - a read loop that classifies every line and hands the frame to a
//!   [`FrameHandler`], strictly in arrival order
//! - a writer that drains the session's outbound queue onto the socket
//!
//! # Lifecycle
//!
//! 1. [`ChannelSession::open`] connects, bounded by the connect timeout
//! 2. [`ChannelSession::start`] spawns both tasks and returns a
//!    [`RunningSession`]
//! 3. The session ends on stop, end-of-stream or an I/O error. Whatever the
//!    cause, the session token is cancelled so the writer and any child
//!    task (keepalive) stop with it
//!
//! Malformed lines are logged, counted and skipped; only the transport ends
//! a session.

use crate::errors::BotError;
use crate::protocol::{ChannelKind, Frame, FrameError};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Longest accepted line, in bytes.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Outbound queue depth per session.
const WRITER_CHANNEL_BUFFER: usize = 64;

/// Something that can be told to stop, exactly once in effect.
pub trait Stoppable: Send + Sync {
    /// Request a stop. Calling this again is a no-op.
    fn stop(&self);

    /// Whether a stop has been requested or the task has ended.
    fn is_stopped(&self) -> bool;
}

/// Why a session's read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Stopped locally (handle, parent token, or shutdown).
    Stopped,
    /// The peer closed the connection.
    PeerClosed,
    /// The transport failed.
    Io(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Stopped => f.write_str("stopped"),
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

/// Per-session frame counters, logged when the session ends.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    malformed_frames: AtomicU64,
}

impl ChannelMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames.load(Ordering::Relaxed)
    }
}

/// Per-channel dispatch logic driven by the read loop.
#[async_trait]
pub trait FrameHandler: Send + 'static {
    /// Handle one classified frame. Replies go through `sink`.
    async fn handle(&mut self, frame: Frame, sink: &FrameSink);

    /// Called once after the read loop ends, before the task returns.
    async fn on_close(&mut self, _reason: &CloseReason) {}
}

/// Write side of a session, handed to handlers and background tasks.
///
/// Once the session has stopped every `send` fails with
/// `BotError::SessionClosed` and nothing more reaches the socket.
#[derive(Clone, Debug)]
pub struct FrameSink {
    kind: ChannelKind,
    sender: mpsc::Sender<String>,
    cancel_token: CancellationToken,
    metrics: Arc<ChannelMetrics>,
}

impl FrameSink {
    /// Queue one frame for the writer.
    ///
    /// # Errors
    ///
    /// - `BotError::SessionClosed` if the session has stopped
    /// - `BotError::Encode` if the frame cannot be serialized
    pub async fn send(&self, frame: &Frame) -> Result<(), BotError> {
        if self.cancel_token.is_cancelled() {
            return Err(BotError::SessionClosed(self.kind));
        }
        let line = frame.encode()?;

        tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => Err(BotError::SessionClosed(self.kind)),
            result = self.sender.send(line) => {
                result.map_err(|_| BotError::SessionClosed(self.kind))
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Resolves once the session has stopped.
    pub async fn closed(&self) {
        self.cancel_token.cancelled().await;
    }

    /// Token for a task whose lifetime must not outlast the session.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ChannelMetrics> {
        &self.metrics
    }

    /// A sink with no socket behind it; queued lines land in `lines`.
    #[cfg(test)]
    #[must_use]
    pub fn detached(kind: ChannelKind) -> DetachedSink {
        let (sender, lines) = mpsc::channel(WRITER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let metrics = ChannelMetrics::new();
        DetachedSink {
            sink: FrameSink {
                kind,
                sender,
                cancel_token: cancel_token.clone(),
                metrics: Arc::clone(&metrics),
            },
            handle: SessionHandle {
                kind,
                peer: "detached".to_string(),
                cancel_token,
                metrics,
            },
            lines,
        }
    }
}

/// In-memory session used by handler tests.
#[cfg(test)]
#[derive(Debug)]
pub struct DetachedSink {
    pub sink: FrameSink,
    pub handle: SessionHandle,
    pub lines: mpsc::Receiver<String>,
}

#[cfg(test)]
impl DetachedSink {
    /// Next queued frame as JSON, if one is already waiting.
    pub fn try_next_json(&mut self) -> Option<serde_json::Value> {
        self.lines
            .try_recv()
            .ok()
            .and_then(|line| serde_json::from_str(&line).ok())
    }

    /// Drain everything queued so far.
    pub fn drain_json(&mut self) -> Vec<serde_json::Value> {
        std::iter::from_fn(|| self.try_next_json()).collect()
    }
}

/// Control handle for a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    kind: ChannelKind,
    peer: String,
    cancel_token: CancellationToken,
    metrics: Arc<ChannelMetrics>,
}

impl SessionHandle {
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ChannelMetrics> {
        &self.metrics
    }
}

impl Stoppable for SessionHandle {
    fn stop(&self) {
        if !self.cancel_token.is_cancelled() {
            debug!(
                target: "bot.channel",
                channel = %self.kind,
                peer = %self.peer,
                "Stopping session"
            );
        }
        self.cancel_token.cancel();
    }

    fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A started session: its control handle, a write handle for the owner,
/// and the read-loop task, which yields the close reason.
#[derive(Debug)]
pub struct RunningSession {
    pub handle: SessionHandle,
    pub sink: FrameSink,
    pub task: JoinHandle<CloseReason>,
}

/// A connected, not yet started session.
#[derive(Debug)]
pub struct ChannelSession {
    kind: ChannelKind,
    peer: String,
    stream: TcpStream,
    cancel_token: CancellationToken,
}

impl ChannelSession {
    /// Connect to `host:port`.
    ///
    /// `cancel_token` becomes the session token; pass a child of the owner's
    /// token so the owner's shutdown reaches the session.
    ///
    /// # Errors
    ///
    /// - `BotError::Connection` if the connection fails or the timeout elapses
    /// - `BotError::Stopped` if `cancel_token` fires while connecting
    #[instrument(skip_all, name = "bot.channel.open", fields(channel = %kind, host = %host, port = port))]
    pub async fn open(
        kind: ChannelKind,
        host: &str,
        port: u16,
        connect_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> Result<Self, BotError> {
        let peer = format!("{host}:{port}");

        let stream = tokio::select! {
            biased;
            () = cancel_token.cancelled() => return Err(BotError::Stopped),
            result = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))) => {
                match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        warn!(target: "bot.channel", channel = %kind, peer = %peer, error = %e, "Connect failed");
                        return Err(BotError::Connection(format!("connect to {peer}: {e}")));
                    }
                    Err(_) => {
                        warn!(
                            target: "bot.channel",
                            channel = %kind,
                            peer = %peer,
                            timeout_ms = u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
                            "Connect timed out"
                        );
                        return Err(BotError::Connection(format!(
                            "connect to {peer} timed out after {connect_timeout:?}"
                        )));
                    }
                }
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(target: "bot.channel", error = %e, "Failed to set TCP_NODELAY");
        }

        info!(target: "bot.channel", channel = %kind, peer = %peer, "Connected");

        Ok(Self {
            kind,
            peer,
            stream,
            cancel_token,
        })
    }

    /// Spawn the read loop and writer.
    pub fn start<H: FrameHandler>(self, handler: H) -> RunningSession {
        let (read_half, write_half) = self.stream.into_split();
        let (sender, receiver) = mpsc::channel(WRITER_CHANNEL_BUFFER);
        let metrics = ChannelMetrics::new();

        let sink = FrameSink {
            kind: self.kind,
            sender,
            cancel_token: self.cancel_token.clone(),
            metrics: Arc::clone(&metrics),
        };

        let writer = tokio::spawn(run_writer(
            self.kind,
            FramedWrite::new(write_half, LinesCodec::new()),
            receiver,
            self.cancel_token.clone(),
            Arc::clone(&metrics),
        ));

        let reader = ReadLoop {
            kind: self.kind,
            peer: self.peer.clone(),
            framed: FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH)),
            sink: sink.clone(),
            cancel_token: self.cancel_token.clone(),
            metrics: Arc::clone(&metrics),
        };
        let task = tokio::spawn(reader.run(handler, writer));

        RunningSession {
            handle: SessionHandle {
                kind: self.kind,
                peer: self.peer,
                cancel_token: self.cancel_token,
                metrics,
            },
            sink,
            task,
        }
    }
}

struct ReadLoop {
    kind: ChannelKind,
    peer: String,
    framed: FramedRead<OwnedReadHalf, LinesCodec>,
    sink: FrameSink,
    cancel_token: CancellationToken,
    metrics: Arc<ChannelMetrics>,
}

impl ReadLoop {
    #[instrument(skip_all, name = "bot.channel", fields(channel = %self.kind, peer = %self.peer))]
    async fn run<H: FrameHandler>(mut self, mut handler: H, writer: JoinHandle<()>) -> CloseReason {
        debug!(target: "bot.channel", channel = %self.kind, "Read loop started");

        let reason = loop {
            let next = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break CloseReason::Stopped,
                next = self.framed.next() => next,
            };

            match next {
                None => break CloseReason::PeerClosed,
                Some(Err(LinesCodecError::Io(e))) => break CloseReason::Io(e.to_string()),
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    self.reject(&FrameError::TooLong);
                }
                Some(Ok(line)) => match Frame::classify(&line) {
                    Ok(frame) => {
                        self.metrics.record_received();
                        trace!(target: "bot.channel", channel = %self.kind, shape = frame.shape(), "Frame received");
                        handler.handle(frame, &self.sink).await;
                    }
                    Err(FrameError::Empty) => {}
                    Err(e) => self.reject(&e),
                },
            }
        };

        // Whatever ended the loop, the writer and child tasks go with it.
        self.cancel_token.cancel();
        handler.on_close(&reason).await;
        if let Err(e) = writer.await {
            warn!(target: "bot.channel", channel = %self.kind, error = %e, "Writer task failed");
        }

        info!(
            target: "bot.channel",
            channel = %self.kind,
            peer = %self.peer,
            reason = %reason,
            frames_received = self.metrics.frames_received(),
            frames_sent = self.metrics.frames_sent(),
            malformed_frames = self.metrics.malformed_frames(),
            "Session closed"
        );

        reason
    }

    fn reject(&self, error: &FrameError) {
        self.metrics.record_malformed();
        warn!(
            target: "bot.channel",
            channel = %self.kind,
            error = %error,
            "Skipping malformed frame"
        );
    }
}

async fn run_writer(
    kind: ChannelKind,
    mut framed: FramedWrite<OwnedWriteHalf, LinesCodec>,
    mut receiver: mpsc::Receiver<String>,
    cancel_token: CancellationToken,
    metrics: Arc<ChannelMetrics>,
) {
    loop {
        let line = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            line = receiver.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        if let Err(e) = framed.send(line).await {
            warn!(target: "bot.channel", channel = %kind, error = %e, "Write failed, closing session");
            cancel_token.cancel();
            break;
        }
        metrics.record_sent();
    }

    // Dropping the write half shuts down our side of the connection.
    debug!(target: "bot.channel", channel = %kind, "Writer stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Handler that records frames and echoes each one back.
    struct EchoHandler {
        seen: mpsc::UnboundedSender<Value>,
    }

    #[async_trait]
    impl FrameHandler for EchoHandler {
        async fn handle(&mut self, frame: Frame, sink: &FrameSink) {
            let _ = self.seen.send(frame.to_value());
            let _ = sink.send(&frame).await;
        }
    }

    async fn connected_pair() -> (ChannelSession, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (session, accepted) = tokio::join!(
            ChannelSession::open(
                ChannelKind::Data,
                "127.0.0.1",
                port,
                Duration::from_secs(1),
                CancellationToken::new(),
            ),
            listener.accept()
        );
        (session.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_open_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = ChannelSession::open(
            ChannelKind::Lobby,
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(BotError::Connection(_))));
    }

    #[tokio::test]
    async fn test_open_cancelled_token() {
        let token = CancellationToken::new();
        token.cancel();

        // 192.0.2.0/24 is reserved for documentation and never routes.
        let result = ChannelSession::open(
            ChannelKind::Data,
            "192.0.2.1",
            6689,
            Duration::from_secs(5),
            token,
        )
        .await;

        assert!(matches!(result, Err(BotError::Stopped)));
    }

    #[tokio::test]
    async fn test_read_loop_dispatches_and_skips_malformed() {
        let (session, peer) = connected_pair().await;
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let running = session.start(EchoHandler { seen: seen_tx });

        let (read_half, mut write_half) = peer.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half
            .write_all(b"not json\n\n{\"m\":51}\n[\"16\",7\n[\"16\",7]\n")
            .await
            .unwrap();

        assert_eq!(seen_rx.recv().await.unwrap(), json!({"m": 51}));
        assert_eq!(seen_rx.recv().await.unwrap(), json!(["16", 7]));

        let echoed: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(echoed, json!({"m": 51}));

        // Peer closes: loop ends with PeerClosed.
        drop(write_half);
        let reason = tokio::time::timeout(Duration::from_secs(2), running.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::PeerClosed);
        assert_eq!(running.handle.metrics().frames_received(), 2);
        assert_eq!(running.handle.metrics().malformed_frames(), 2);
        assert!(running.handle.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes_socket() {
        let (session, peer) = connected_pair().await;
        let (seen_tx, _seen_rx) = mpsc::unbounded_channel();
        let running = session.start(EchoHandler { seen: seen_tx });

        running.handle.stop();
        running.handle.stop();
        assert!(running.handle.is_stopped());

        let reason = tokio::time::timeout(Duration::from_secs(2), running.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Stopped);

        // Both halves are gone, so the peer sees end-of-stream.
        let mut lines = BufReader::new(peer).lines();
        let next = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert!(next.is_none());

        running.handle.stop();
    }

    #[tokio::test]
    async fn test_parent_token_stops_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let parent = CancellationToken::new();

        let (session, _accepted) = tokio::join!(
            ChannelSession::open(
                ChannelKind::Lobby,
                "127.0.0.1",
                port,
                Duration::from_secs(1),
                parent.child_token(),
            ),
            listener.accept()
        );
        let (seen_tx, _seen_rx) = mpsc::unbounded_channel();
        let running = session.unwrap().start(EchoHandler { seen: seen_tx });

        parent.cancel();

        let reason = tokio::time::timeout(Duration::from_secs(2), running.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Stopped);
    }

    #[tokio::test]
    async fn test_sink_rejects_after_stop() {
        let mut detached = FrameSink::detached(ChannelKind::Data);
        let frame = Frame::try_from(json!({"m": 37})).unwrap();

        detached.sink.send(&frame).await.unwrap();
        assert_eq!(detached.try_next_json(), Some(json!({"m": 37})));

        detached.handle.stop();
        let result = detached.sink.send(&frame).await;
        assert!(matches!(
            result,
            Err(BotError::SessionClosed(ChannelKind::Data))
        ));
        assert!(detached.try_next_json().is_none());
        assert!(detached.sink.is_closed());
    }

    #[tokio::test]
    async fn test_child_token_follows_session() {
        let detached = FrameSink::detached(ChannelKind::Data);
        let child = detached.sink.child_token();
        assert!(!child.is_cancelled());

        detached.handle.stop();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::Stopped.to_string(), "stopped");
        assert_eq!(CloseReason::PeerClosed.to_string(), "peer closed");
        assert_eq!(
            CloseReason::Io("reset".to_string()).to_string(),
            "i/o error: reset"
        );
    }
}
