//! Security event records produced by the kernel monitor hooks
//!
//! Each hook constructs exactly one [`SecurityEvent`] per triggering
//! occurrence and pushes it into the bounded event channel. Events are
//! immutable once built and are consumed exactly once by the drain loop.

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum number of payload bytes captured as a suspicious-pattern sample.
pub const PATTERN_SAMPLE_LEN: usize = 32;

/// What kind of anomaly a hook observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    /// Repeated privilege change on one pid inside the escalation window
    PrivEscalation,
    /// Control-channel (netlink) traffic anomaly
    NetlinkAnomaly,
    /// Suspicious network traffic or namespace manipulation
    SuspiciousNetwork,
    /// Interface flag change from a non-privileged identity
    UnauthorizedInterface,
    /// Known attack signature found in a control message payload
    MaliciousPattern,
}

impl EventType {
    /// Stable label for metrics and audit records
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PrivEscalation => "priv_escalation",
            EventType::NetlinkAnomaly => "netlink_anomaly",
            EventType::SuspiciousNetwork => "suspicious_network",
            EventType::UnauthorizedInterface => "unauthorized_interface",
            EventType::MaliciousPattern => "malicious_pattern",
        }
    }
}

/// Event severity, ordered from least to most serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// The process on whose behalf a hook fired.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    /// Task comm, truncated by the kernel to 16 bytes; never empty
    pub process_name: String,
}

impl ProcessIdentity {
    pub fn new(pid: u32, uid: u32, gid: u32, process_name: impl Into<String>) -> Self {
        let mut process_name = process_name.into();
        if process_name.is_empty() {
            // Audit invariant: every record carries a non-empty process name
            process_name = "<unknown>".to_string();
        }
        Self {
            pid,
            uid,
            gid,
            process_name,
        }
    }

    /// Identity of the calling process, read from the live system.
    pub fn current() -> Self {
        let pid = std::process::id();
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        let process_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "<unknown>".to_string());
        Self::new(pid, uid, gid, process_name)
    }

    /// Whether this identity counts as privileged for monitoring purposes.
    ///
    /// Root and system users (uid < 1000) are expected to touch interfaces
    /// and namespaces; everyone else is flagged.
    pub fn is_privileged(&self) -> bool {
        self.uid == 0 || self.uid < 1000
    }
}

/// A single observation from a monitor hook.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
    /// Monotonic-style nanosecond timestamp assigned at construction
    pub timestamp_ns: u64,
    pub event_type: EventType,
    pub severity: Severity,
    pub process_name: String,
    /// Netlink message type, for control-channel events
    pub netlink_type: Option<u16>,
    /// Interface index, for interface-flag events
    pub interface_index: Option<u32>,
    /// Up to [`PATTERN_SAMPLE_LEN`] bytes around a matched attack signature
    pub pattern_sample: Option<Vec<u8>>,
}

impl SecurityEvent {
    pub fn new(event_type: EventType, severity: Severity, who: &ProcessIdentity) -> Self {
        Self {
            pid: who.pid,
            uid: who.uid,
            gid: who.gid,
            timestamp_ns: now_ns(),
            event_type,
            severity,
            process_name: who.process_name.clone(),
            netlink_type: None,
            interface_index: None,
            pattern_sample: None,
        }
    }

    pub fn with_netlink_type(mut self, netlink_type: u16) -> Self {
        self.netlink_type = Some(netlink_type);
        self
    }

    pub fn with_interface_index(mut self, index: u32) -> Self {
        self.interface_index = Some(index);
        self
    }

    /// Attach a payload sample, truncated to [`PATTERN_SAMPLE_LEN`] bytes.
    pub fn with_pattern_sample(mut self, sample: &[u8]) -> Self {
        let len = sample.len().min(PATTERN_SAMPLE_LEN);
        self.pattern_sample = Some(sample[..len].to_vec());
        self
    }

    /// Pattern sample rendered as hex for audit output.
    pub fn pattern_sample_hex(&self) -> Option<String> {
        self.pattern_sample.as_ref().map(hex::encode)
    }
}

/// Nanoseconds since the Unix epoch.
///
/// The kernel-side original used `bpf_ktime_get_ns`; wall-clock nanoseconds
/// keep the same resolution and let audit consumers re-sort records.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
