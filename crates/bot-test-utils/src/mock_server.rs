//! Mock game server for channel tests.
//!
//! Both game endpoints speak one JSON value per line over plain TCP, so a
//! single mock covers the data channel and lobby servers alike. Each
//! accepted connection becomes a [`MockPeer`] the test drives by hand.
//!
//! Use real time with these helpers: reads are bounded by timeouts, and a
//! paused clock would fire them while the socket is still waiting on I/O.

use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// How long a peer waits for an expected frame or connection.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Loopback line server on an ephemeral port.
#[derive(Debug)]
pub struct MockGameServer {
    listener: TcpListener,
    port: u16,
}

impl MockGameServer {
    /// Bind to `127.0.0.1:0`.
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock server should bind");
        let port = listener
            .local_addr()
            .expect("bound listener has an address")
            .port();
        Self { listener, port }
    }

    #[must_use]
    pub fn host(&self) -> &'static str {
        "127.0.0.1"
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the bot to connect.
    ///
    /// # Panics
    ///
    /// Panics if nobody connects within [`DEFAULT_RECV_TIMEOUT`].
    pub async fn accept(&self) -> MockPeer {
        let (stream, addr) = tokio::time::timeout(DEFAULT_RECV_TIMEOUT, self.listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .expect("accept should succeed");
        tracing::debug!(peer = %addr, port = self.port, "Mock server accepted connection");

        let (read, write) = stream.into_split();
        MockPeer {
            lines: BufReader::new(read).lines(),
            writer: write,
        }
    }

    /// Assert that nobody connects within `wait`.
    ///
    /// # Panics
    ///
    /// Panics if a connection arrives.
    pub async fn expect_no_connection(&self, wait: Duration) {
        if let Ok(accepted) = tokio::time::timeout(wait, self.listener.accept()).await {
            let peer = accepted.map(|(_, addr)| addr.to_string());
            panic!("unexpected connection: {peer:?}");
        }
    }
}

/// Listener whose accept queue is already full, so a new connect hangs in
/// SYN retransmission until the client's own timeout fires.
#[derive(Debug)]
pub struct StalledListener {
    _listener: TcpListener,
    _held: Vec<TcpStream>,
    port: u16,
}

impl StalledListener {
    /// Bind with a zero backlog and connect until the queue stops accepting.
    ///
    /// # Panics
    ///
    /// Panics if the socket cannot be bound or the queue never fills.
    pub async fn bind() -> Self {
        let socket = TcpSocket::new_v4().expect("socket should be created");
        socket
            .bind(([127, 0, 0, 1], 0).into())
            .expect("stalled listener should bind");
        let listener = socket.listen(0).expect("stalled listener should listen");
        let port = listener
            .local_addr()
            .expect("bound listener has an address")
            .port();

        let mut held = Vec::new();
        loop {
            let attempt = tokio::time::timeout(
                Duration::from_millis(200),
                TcpStream::connect(("127.0.0.1", port)),
            )
            .await;
            match attempt {
                Ok(Ok(stream)) => held.push(stream),
                Ok(Err(e)) => panic!("filling accept queue failed: {e}"),
                Err(_) => break,
            }
            assert!(held.len() < 64, "accept queue never filled");
        }
        tracing::debug!(port, held = held.len(), "Stalled listener ready");

        Self {
            _listener: listener,
            _held: held,
            port,
        }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Server side of one accepted connection.
#[derive(Debug)]
pub struct MockPeer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl MockPeer {
    /// Write `value` as one line.
    pub async fn send_json(&mut self, value: &Value) {
        self.send_line(&value.to_string()).await;
    }

    /// Write a raw line (a newline is appended).
    pub async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("mock peer write should succeed");
        self.writer.flush().await.expect("mock peer flush should succeed");
    }

    /// Read the next frame.
    ///
    /// # Panics
    ///
    /// Panics on timeout, EOF or a line that is not JSON.
    pub async fn recv_json(&mut self) -> Value {
        match self.try_recv_json(DEFAULT_RECV_TIMEOUT).await {
            Some(value) => value,
            None => panic!("timed out waiting for a frame"),
        }
    }

    /// Read the next frame, or `None` if nothing arrives within `wait`.
    ///
    /// # Panics
    ///
    /// Panics on EOF or a line that is not JSON.
    pub async fn try_recv_json(&mut self, wait: Duration) -> Option<Value> {
        let line = tokio::time::timeout(wait, self.lines.next_line())
            .await
            .ok()?
            .expect("mock peer read should succeed")
            .expect("connection closed while waiting for a frame");
        Some(serde_json::from_str(&line).unwrap_or_else(|e| panic!("bot sent non-JSON {line:?}: {e}")))
    }

    /// Read frames until one satisfies `matches`, discarding the rest
    /// (heartbeats, for instance).
    ///
    /// # Panics
    ///
    /// Panics if no matching frame arrives within [`DEFAULT_RECV_TIMEOUT`].
    pub async fn recv_matching(&mut self, matches: impl Fn(&Value) -> bool) -> Value {
        let deadline = tokio::time::Instant::now() + DEFAULT_RECV_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.try_recv_json(remaining).await {
                Some(value) if matches(&value) => return value,
                Some(value) => tracing::debug!(frame = %value, "Mock peer skipped frame"),
                None => panic!("timed out waiting for a matching frame"),
            }
        }
    }

    /// Assert that no frame arrives within `wait`.
    ///
    /// # Panics
    ///
    /// Panics if a frame arrives.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(line) = tokio::time::timeout(wait, self.lines.next_line()).await {
            panic!("expected silence, got {line:?}");
        }
    }

    /// Assert that the bot closes the connection, returning any frames that
    /// were still in flight.
    ///
    /// # Panics
    ///
    /// Panics if the connection is still open after [`DEFAULT_RECV_TIMEOUT`].
    pub async fn expect_closed(&mut self) -> Vec<Value> {
        let mut drained = Vec::new();
        let closed = tokio::time::timeout(DEFAULT_RECV_TIMEOUT, async {
            loop {
                match self.lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Ok(value) = serde_json::from_str(&line) {
                            drained.push(value);
                        }
                    }
                    Ok(None) | Err(_) => return,
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "connection still open, drained {drained:?}");
        drained
    }

    /// Close the connection from the server side.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
    }
}
