//! Per-identity rate classification
//!
//! Counts monitored operations per uid inside a fixed window. Crossing the
//! active policy's threshold yields [`RateDecision::Flagged`], a
//! classification signal only; the orchestrator decides what to do with it.
//!
//! Window semantics are fixed-and-reset: when a window has elapsed the
//! counter restarts at 1, so the first observation of a fresh window is
//! never flagged. The counter keeps incrementing past the threshold so the
//! burst size stays observable.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Default window, matching the original monitor's 60-second horizon.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Normal,
    Flagged,
}

#[derive(Debug, Clone, Copy)]
struct RateCounter {
    window_start: Instant,
    count: u32,
}

/// Sliding per-uid counters feeding anomaly classification.
///
/// The table is a concurrent map: every mutation is a single-key update
/// under that key's lock. No cross-key consistency is assumed anywhere.
pub struct RateLimiter {
    counters: DashMap<u32, RateCounter>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            counters: DashMap::new(),
            window,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_WINDOW)
    }

    /// Count one operation for `uid` against `max_events_per_window`.
    pub fn observe(&self, uid: u32, max_events_per_window: u32) -> RateDecision {
        let count = self.bump(uid);
        if count > max_events_per_window {
            RateDecision::Flagged
        } else {
            RateDecision::Normal
        }
    }

    /// Count one operation for `uid` without a threshold decision.
    ///
    /// Used by paths that must feed the counters but have no policy in hand
    /// (the secure channel counting authentication failures); a later
    /// `observe` on the same identity sees the accumulated count.
    pub fn record(&self, uid: u32) {
        self.bump(uid);
    }

    fn bump(&self, uid: u32) -> u32 {
        let now = Instant::now();
        let mut entry = self.counters.entry(uid).or_insert(RateCounter {
            window_start: now,
            count: 0,
        });

        if now.duration_since(entry.window_start) >= self.window {
            // Fresh window: no stale accumulation, first observation is free
            entry.window_start = now;
            entry.count = 1;
            return 1;
        }

        entry.count += 1;
        entry.count
    }

    /// Current count for an identity, if any window is open.
    pub fn count_for(&self, uid: u32) -> Option<u32> {
        self.counters.get(&uid).map(|c| c.count)
    }

    /// Drop counters idle for longer than `ttl`.
    ///
    /// The original kernel maps never expired entries; this keeps the table
    /// bounded for long-running daemons. Returns how many were removed.
    pub fn prune_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| now.duration_since(counter.window_start) < ttl);
        before - self.counters.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_edge() {
        let limiter = RateLimiter::with_defaults();
        // Observations 1..=10 stay normal, 11 flags
        for i in 1..=10 {
            assert_eq!(limiter.observe(1000, 10), RateDecision::Normal, "obs {}", i);
        }
        assert_eq!(limiter.observe(1000, 10), RateDecision::Flagged);
        assert_eq!(limiter.count_for(1000), Some(11));
    }

    #[test]
    fn test_counter_continues_past_flag() {
        let limiter = RateLimiter::with_defaults();
        for _ in 0..15 {
            limiter.observe(1000, 10);
        }
        assert_eq!(limiter.count_for(1000), Some(15));
        assert_eq!(limiter.observe(1000, 10), RateDecision::Flagged);
    }

    #[test]
    fn test_record_feeds_the_same_counters() {
        let limiter = RateLimiter::with_defaults();
        // Ten auth failures counted without a policy in hand
        for _ in 0..10 {
            limiter.record(1000);
        }
        assert_eq!(limiter.count_for(1000), Some(10));
        // The next policied observation sees the accumulated count
        assert_eq!(limiter.observe(1000, 10), RateDecision::Flagged);
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = RateLimiter::with_defaults();
        for _ in 0..11 {
            limiter.observe(1000, 10);
        }
        assert_eq!(limiter.observe(2000, 10), RateDecision::Normal);
    }

    #[test]
    fn test_window_reset() {
        let limiter = RateLimiter::new(Duration::from_millis(30));
        for _ in 0..11 {
            limiter.observe(1000, 10);
        }
        assert_eq!(limiter.observe(1000, 10), RateDecision::Flagged);

        std::thread::sleep(Duration::from_millis(40));
        // New window: count restarts at 1, never flagged
        assert_eq!(limiter.observe(1000, 10), RateDecision::Normal);
        assert_eq!(limiter.count_for(1000), Some(1));
    }

    #[test]
    fn test_prune_idle() {
        let limiter = RateLimiter::new(Duration::from_millis(10));
        limiter.observe(1000, 10);
        limiter.observe(2000, 10);
        assert_eq!(limiter.tracked_identities(), 2);

        std::thread::sleep(Duration::from_millis(20));
        limiter.observe(2000, 10); // reopens 2000's window
        let removed = limiter.prune_idle(Duration::from_millis(15));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_identities(), 1);
    }
}
