//! Kernel-space security monitor: hooks, classification, event delivery
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Constrained hook context (kernel side)                     │
//! │                                                             │
//! │  cred_prepare ─┐                                            │
//! │  netlink rx  ──┤                                            │
//! │  packet rx   ──┼──► SecurityEvent ──► bounded EventChannel  │
//! │  ifflags     ──┤        (push never blocks; overflow        │
//! │  netns       ──┘         drops oldest + counts the drop)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼  dedicated drain task
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Portable daemon side                                       │
//! │                                                             │
//! │  Orchestrator (disposition) ──► Audit Sink + metrics        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Hooks only ever construct events and push; every piece of policy lives
//! on the drain side where it is testable.

pub mod event;
pub mod hooks;
pub mod packet;
pub mod privilege;
pub mod rate;

pub use event::{EventType, ProcessIdentity, SecurityEvent, Severity};
pub use hooks::{KernelMonitor, Verdict};
pub use privilege::{PrivilegeDecision, PrivilegeTracker};
pub use rate::{RateDecision, RateLimiter};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};

use crate::audit::{AuditRecord, AuditSink};
use crate::metrics;
use crate::security::{Disposition, SecurityOrchestrator};

/// Default capacity of the hook → drain event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// How often the drain task reports accumulated drops (not per-event, to
/// avoid log amplification under overload).
const DROP_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Bounded, lossy-under-overload channel from hooks to the drain task.
///
/// Producers never block: a push into a full channel evicts the oldest
/// unconsumed event and increments the drop counter. Per-hook emission
/// order is preserved; no cross-hook global order is promised.
pub struct EventChannel {
    queue: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
    closed: AtomicBool,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "event channel capacity must be non-zero");
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue an event without ever blocking the hook context.
    pub fn push(&self, event: SecurityEvent) {
        {
            let mut queue = self.queue.lock().expect("event queue poisoned");
            if queue.len() == self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::EVENTS_DROPPED.inc();
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Non-blocking take of the oldest buffered event.
    pub fn try_pop(&self) -> Option<SecurityEvent> {
        self.queue.lock().expect("event queue poisoned").pop_front()
    }

    /// Await the next event. Returns `None` once the channel is closed and
    /// fully drained.
    pub async fn recv(&self) -> Option<SecurityEvent> {
        loop {
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Close the channel; wakes the drain task so it can finish buffered
    /// events and exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("event queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total events evicted since startup. Monotonically increasing.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Long-lived consumer of the event channel.
///
/// Forwards each event through the orchestrator for disposition, emits the
/// audit record, and keeps metrics current. On shutdown it finishes the
/// events already buffered (best-effort drain), then exits.
pub async fn run_drain(
    channel: Arc<EventChannel>,
    orchestrator: Arc<SecurityOrchestrator>,
    audit: Arc<AuditSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut drop_report = tokio::time::interval(DROP_REPORT_INTERVAL);
    drop_report.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut reported_drops: u64 = 0;

    tracing::info!("event drain task started");
    loop {
        tokio::select! {
            maybe_event = channel.recv() => match maybe_event {
                Some(event) => handle_event(&orchestrator, &audit, event),
                None => break,
            },
            _ = drop_report.tick() => {
                reported_drops = report_drops(&channel, &audit, reported_drops);
            }
            _ = shutdown.changed() => break,
        }
    }

    // Best-effort drain of whatever is still buffered
    let mut remaining = 0usize;
    while let Some(event) = channel.try_pop() {
        handle_event(&orchestrator, &audit, event);
        remaining += 1;
    }
    report_drops(&channel, &audit, reported_drops);
    tracing::info!(drained = remaining, "event drain task stopped");
}

fn handle_event(orchestrator: &SecurityOrchestrator, audit: &AuditSink, event: SecurityEvent) {
    metrics::SECURITY_EVENTS
        .with_label_values(&[event.event_type.as_str(), event.severity.as_str()])
        .inc();

    let disposition = orchestrator.disposition(&event);
    if disposition == Disposition::Drop {
        tracing::warn!(
            event_type = event.event_type.as_str(),
            pid = event.pid,
            uid = event.uid,
            "operation dropped by security policy"
        );
    }
    audit.emit(AuditRecord::for_event(&event, disposition));
}

fn report_drops(channel: &EventChannel, audit: &AuditSink, reported: u64) -> u64 {
    let total = channel.dropped_count();
    if total > reported {
        tracing::warn!(
            dropped = total - reported,
            total_dropped = total,
            "event channel overflow since last report"
        );
        audit.emit(AuditRecord::events_dropped(total - reported, total));
    }
    total
}
