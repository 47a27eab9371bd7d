//! Monotonic millisecond clock and blocking pauses.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Time source for the firmware loop.
///
/// `delay` always runs to completion; the loop never cancels a pause.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Milliseconds since the clock was created.
    fn millis(&self) -> u64;

    /// Pause the loop.
    async fn delay(&self, duration: Duration);
}

/// Wall-clock time on the tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioClock {
    start: tokio::time::Instant,
}

impl TokioClock {
    /// Start counting from now.
    pub fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when told to.
///
/// `delay` advances the clock by the requested duration and returns at once,
/// so a whole loop run can be replayed deterministically. Clones share the
/// same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn delay(&self, duration: Duration) {
        self.advance(duration);
    }
}
