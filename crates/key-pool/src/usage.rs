//! Per-credential call counts in fixed time windows
//!
//! Each credential has a bucket per window (`now_ms / window_ms`). Only the
//! current and the immediately preceding bucket are kept; anything older is
//! pruned on the next write, so memory stays bounded per credential.

use std::collections::HashMap;
use std::time::Duration;

/// Windowed usage counters keyed by credential id.
#[derive(Debug)]
pub struct UsageMonitor {
    window_ms: u64,
    windows: HashMap<String, HashMap<u64, u32>>,
}

impl UsageMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: (window.as_millis() as u64).max(1),
            windows: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    fn bucket(&self, now_ms: u64) -> u64 {
        now_ms / self.window_ms
    }

    /// Count one call for `id` in the current window. Returns the new count.
    pub fn record_call(&mut self, id: &str, now_ms: u64) -> u32 {
        let current = self.bucket(now_ms);
        let buckets = self.windows.entry(id.to_string()).or_default();
        buckets.retain(|bucket, _| bucket.saturating_add(1) >= current);
        let count = buckets.entry(current).or_insert(0);
        *count += 1;
        *count
    }

    /// Calls recorded for `id` in the current window only.
    pub fn current_usage(&self, id: &str, now_ms: u64) -> u32 {
        let current = self.bucket(now_ms);
        self.windows
            .get(id)
            .and_then(|buckets| buckets.get(&current))
            .copied()
            .unwrap_or(0)
    }

    /// Forget all usage.
    pub fn clear(&mut self) {
        self.windows.clear();
    }

    #[cfg(test)]
    fn bucket_count(&self, id: &str) -> usize {
        self.windows.get(id).map(HashMap::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> UsageMonitor {
        UsageMonitor::new(Duration::from_secs(60))
    }

    #[test]
    fn counts_calls_in_current_window() {
        let mut usage = monitor();
        assert_eq!(usage.record_call("key-a", 1_000), 1);
        assert_eq!(usage.record_call("key-a", 59_999), 2);
        assert_eq!(usage.current_usage("key-a", 30_000), 2);
        assert_eq!(usage.current_usage("key-b", 30_000), 0);
    }

    #[test]
    fn usage_resets_at_window_boundary() {
        let mut usage = monitor();
        usage.record_call("key-a", 59_999);
        assert_eq!(usage.current_usage("key-a", 60_000), 0);
    }

    #[test]
    fn prunes_buckets_older_than_previous_window() {
        let mut usage = monitor();
        usage.record_call("key-a", 0);
        usage.record_call("key-a", 60_000);
        assert_eq!(usage.bucket_count("key-a"), 2);

        usage.record_call("key-a", 180_000);
        // Buckets 0 and 1 are both older than the previous bucket (2)
        assert_eq!(usage.bucket_count("key-a"), 1);
        assert_eq!(usage.current_usage("key-a", 180_000), 1);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut usage = monitor();
        usage.record_call("key-a", 0);
        usage.clear();
        assert_eq!(usage.current_usage("key-a", 0), 0);
    }

    #[test]
    fn zero_window_is_clamped() {
        let mut usage = UsageMonitor::new(Duration::ZERO);
        usage.record_call("key-a", 5);
        assert_eq!(usage.current_usage("key-a", 5), 1);
        assert_eq!(usage.window(), Duration::from_millis(1));
    }
}
