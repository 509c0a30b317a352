//! Append-only audit trail
//!
//! Every rejected message, flagged event, level transition and fatal
//! condition lands here as a structured record. Records are kept in an
//! in-memory append-only log (the external log-shipping binding is a
//! separate collaborator) and mirrored through `tracing` under
//! `target: "audit"` so they reach the normal log pipeline.
//!
//! Ordering is happens-before consistent with what each producer observed;
//! there is no total order across concurrent producers. Each record carries
//! its own timestamp and a time-sortable v7 id so consumers can re-sort.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;

use crate::monitor::event::{SecurityEvent, Severity};
use crate::security::{Disposition, SecurityLevel};

/// What a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A security event handled by the drain loop
    Event,
    /// A control-channel message rejected before processing
    ChannelRejected,
    /// A security-level transition (attempted or applied)
    LevelTransition,
    /// Successful startup enforcement
    Startup,
    /// Events evicted from the full channel since the last report
    EventsDropped,
    /// Non-recoverable condition; the daemon aborts after emitting this
    Fatal,
}

/// One structured audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Time-sortable unique id (UUID v7)
    pub id: String,
    /// Milliseconds since the Unix epoch, assigned at construction
    pub timestamp_ms: u64,
    pub kind: AuditKind,
    pub severity: Severity,
    pub detail: serde_json::Value,
}

impl AuditRecord {
    fn new(kind: AuditKind, severity: Severity, detail: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            timestamp_ms: now_ms(),
            kind,
            severity,
            detail,
        }
    }

    /// Record for a drained security event and its disposition.
    pub fn for_event(event: &SecurityEvent, disposition: Disposition) -> Self {
        Self::new(
            AuditKind::Event,
            event.severity,
            json!({
                "event_type": event.event_type.as_str(),
                "pid": event.pid,
                "uid": event.uid,
                "gid": event.gid,
                "process": event.process_name,
                "timestamp_ns": event.timestamp_ns,
                "netlink_type": event.netlink_type,
                "interface_index": event.interface_index,
                "pattern_sample": event.pattern_sample_hex(),
                "disposition": disposition.as_str(),
            }),
        )
    }

    /// Record for a message the secure channel refused.
    pub fn channel_rejected(peer: &str, reason: &str, severity: Severity) -> Self {
        Self::new(
            AuditKind::ChannelRejected,
            severity,
            json!({ "peer": peer, "reason": reason }),
        )
    }

    pub fn level_transition(
        from: SecurityLevel,
        to: SecurityLevel,
        applied: bool,
        reason: &str,
    ) -> Self {
        Self::new(
            AuditKind::LevelTransition,
            Severity::Medium,
            json!({
                "from": from.as_str(),
                "to": to.as_str(),
                "applied": applied,
                "reason": reason,
            }),
        )
    }

    pub fn startup(level: SecurityLevel) -> Self {
        Self::new(
            AuditKind::Startup,
            Severity::Low,
            json!({ "level": level.as_str() }),
        )
    }

    pub fn events_dropped(since_last_report: u64, total: u64) -> Self {
        Self::new(
            AuditKind::EventsDropped,
            Severity::Low,
            json!({ "dropped": since_last_report, "total_dropped": total }),
        )
    }

    pub fn fatal(stage: &str, reason: &str) -> Self {
        Self::new(
            AuditKind::Fatal,
            Severity::Critical,
            json!({ "stage": stage, "reason": reason }),
        )
    }
}

/// Append-only sink for audit records.
pub struct AuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditSink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Append a record and mirror it to the log pipeline.
    pub fn emit(&self, record: AuditRecord) {
        let line = serde_json::to_string(&record.detail).unwrap_or_default();
        match record.severity {
            Severity::Low => {
                tracing::info!(target: "audit", kind = ?record.kind, id = %record.id, detail = %line)
            }
            Severity::Medium => {
                tracing::warn!(target: "audit", kind = ?record.kind, id = %record.id, detail = %line)
            }
            Severity::High | Severity::Critical => {
                tracing::error!(target: "audit", kind = ?record.kind, id = %record.id, detail = %line)
            }
        }
        self.records.lock().expect("audit log poisoned").push(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("audit log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<AuditRecord> {
        let records = self.records.lock().expect("audit log poisoned");
        let start = records.len().saturating_sub(n);
        records[start..].to_vec()
    }
}

impl Default for AuditSink {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
