//! Prometheus metrics for the secure control core
//!
//! Populated by the channel, the event drain loop and the monitor hooks.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Gauge,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Monitor / event channel
    // ─────────────────────────────────────────────────────────────────────────────

    /// Security events drained from the monitor channel.
    ///
    /// Labels:
    /// - event_type: priv_escalation, netlink_anomaly, ...
    /// - severity: low, medium, high, critical
    pub static ref SECURITY_EVENTS: CounterVec = register_counter_vec!(
        "alopexd_security_events_total",
        "Security events drained from the monitor channel",
        &["event_type", "severity"]
    ).expect("failed to register SECURITY_EVENTS metric");

    /// Events evicted from the full channel. The lossy-under-overload
    /// policy is deliberate; this counter is how the loss stays observable.
    pub static ref EVENTS_DROPPED: Counter = register_counter!(
        "alopexd_events_dropped_total",
        "Security events dropped due to a full event channel"
    ).expect("failed to register EVENTS_DROPPED metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Secure channel
    // ─────────────────────────────────────────────────────────────────────────────

    /// Messages rejected for replayed or stale sequence numbers.
    pub static ref REPLAY_REJECTIONS: Counter = register_counter!(
        "alopexd_replay_rejections_total",
        "Control messages rejected by replay defense"
    ).expect("failed to register REPLAY_REJECTIONS metric");

    /// Messages whose authentication tag failed verification.
    pub static ref AUTH_FAILURES: Counter = register_counter!(
        "alopexd_auth_failures_total",
        "Control messages that failed tag verification"
    ).expect("failed to register AUTH_FAILURES metric");

    /// Currently open secure sessions.
    pub static ref ACTIVE_SESSIONS: Gauge = register_gauge!(
        "alopexd_active_sessions",
        "Currently open secure channel sessions"
    ).expect("failed to register ACTIVE_SESSIONS metric");
}

/// Touch the registry so all series exist from startup.
pub fn init() {
    let _ = ACTIVE_SESSIONS.get();
    let _ = EVENTS_DROPPED.get();
}
