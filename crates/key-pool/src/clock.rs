//! Millisecond clock used for cooldowns and usage windows

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Source of the current time in milliseconds.
///
/// Must be monotonic within a process run; usage buckets and cooldown
/// deadlines are compared against it.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall-clock anchored, monotonic clock driven by `tokio::time`.
///
/// The Unix time is sampled once at construction and advanced by tokio's
/// monotonic `Instant`, so a paused test runtime controls it too.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: Instant,
    base_ms: u64,
}

impl TokioClock {
    pub fn new() -> Self {
        let base_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self::starting_at(base_ms)
    }

    /// Clock that reads `base_ms` at construction time.
    pub fn starting_at(base_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            base_ms,
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_millis(&self) -> u64 {
        self.base_ms + self.origin.elapsed().as_millis() as u64
    }
}
