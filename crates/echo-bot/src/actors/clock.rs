//! Logical server clock for a lobby session.
//!
//! The lobby server broadcasts its clock (tag "17"); between broadcasts the
//! bot extrapolates with its own monotonic clock. Uses `tokio::time::Instant`
//! so paused-time tests see the same clock as the code under test.

use tokio::time::Instant;

/// Reconstructed server time, in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct ClockSync {
    server_time_base: i64,
    local_anchor: Instant,
}

impl ClockSync {
    /// Base 0, anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            server_time_base: 0,
            local_anchor: Instant::now(),
        }
    }

    /// Adopt a server broadcast (already in milliseconds) and re-anchor.
    pub fn sync(&mut self, server_time_ms: i64) {
        self.server_time_base = server_time_ms;
        self.local_anchor = Instant::now();
    }

    /// `base + (now - anchor)` in milliseconds.
    #[must_use]
    pub fn current_server_time(&self) -> i64 {
        let elapsed = i64::try_from(self.local_anchor.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.server_time_base.saturating_add(elapsed)
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}
