//! Periodic transmission gate.

use std::time::Duration;

/// Decides when the next snapshot push is due.
///
/// The scheduler fires when at least `interval` has passed since the last
/// fire, and the fire itself records the send time. A push that the transport
/// fails to deliver is not retried; the next interval sends the latest
/// snapshot instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmissionScheduler {
    interval_ms: u64,
    last_sent_ms: u64,
    fired: u64,
}

impl TransmissionScheduler {
    /// Create a scheduler whose first window starts at `now_ms`.
    pub fn new(interval: Duration, now_ms: u64) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_sent_ms: now_ms,
            fired: 0,
        }
    }

    /// Whether a push is due at `now_ms`. Equality counts as due.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.elapsed(now_ms) >= self.interval_ms
    }

    /// Fire if due, recording `now_ms` as the send time.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if !self.is_due(now_ms) {
            return false;
        }
        self.last_sent_ms = now_ms;
        self.fired += 1;
        true
    }

    /// Milliseconds since the last fire (or since creation).
    pub fn elapsed(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_sent_ms)
    }

    /// Time of the last fire.
    pub fn last_sent_ms(&self) -> u64 {
        self.last_sent_ms
    }

    /// Configured interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Number of times the scheduler has fired.
    pub fn fired(&self) -> u64 {
        self.fired
    }
}
