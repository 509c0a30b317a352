//! Privilege-change tracking for escalation detection
//!
//! Records the timestamp of every privilege-relevant change per pid. Two
//! changes on the same pid inside the escalation threshold (default 1 s)
//! look like a setuid bounce and flag [`PrivilegeDecision::Escalation`].
//!
//! The stored timestamp is updated on every call regardless of outcome, so
//! a burst of N rapid changes flags changes 2..N (the first is unknowable).

use std::time::Duration;

use dashmap::DashMap;

/// Default escalation gap, matching the original monitor's 1-second rule.
pub const DEFAULT_ESCALATION_GAP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeDecision {
    Normal,
    Escalation,
}

/// Per-pid record of the last privilege change.
pub struct PrivilegeTracker {
    records: DashMap<u32, u64>,
    threshold_ns: u64,
}

impl PrivilegeTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            records: DashMap::new(),
            threshold_ns: threshold.as_nanos() as u64,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_ESCALATION_GAP)
    }

    /// Record a privilege change at `timestamp_ns` for `pid`.
    pub fn record_change(&self, pid: u32, timestamp_ns: u64) -> PrivilegeDecision {
        let previous = self.records.insert(pid, timestamp_ns);
        match previous {
            Some(last) if timestamp_ns.saturating_sub(last) < self.threshold_ns => {
                PrivilegeDecision::Escalation
            }
            _ => PrivilegeDecision::Normal,
        }
    }

    /// Forget a pid, e.g. on process exit.
    pub fn forget(&self, pid: u32) {
        self.records.remove(&pid);
    }

    pub fn tracked_pids(&self) -> usize {
        self.records.len()
    }
}
