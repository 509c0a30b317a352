//! alopexd - secure control core of the ALOPEX network daemon
//!
//! This library implements the daemon's hardest-won ground: the
//! authenticated control channel to the privileged kernel interface and
//! the kernel-space security monitor that classifies anomalous operations.
//!
//! # Modules
//!
//! - `channel` - framed, authenticated message protocol with replay defense
//! - `monitor` - kernel observation hooks, rate/privilege classification,
//!   bounded event delivery
//! - `security` - security levels, capability enforcement, orchestration
//! - `audit` - append-only structured audit records
//! - `config` - security level and override surface
//! - `metrics` - Prometheus counters for channel and monitor activity
//! - `tracing` - log/trace bootstrap with OTLP export
//!
//! # Quick Start
//!
//! ```ignore
//! use alopexd::channel::{FrameTransport, SecureChannel, ChannelConfig};
//!
//! let (ours, theirs) = FrameTransport::pair(64);
//! let channel = SecureChannel::open("peer", key, ours, ChannelConfig::default(), shutdown);
//! channel.send(MSG_LINK_UP, b"eth0").await?;
//! ```

pub mod audit;
pub mod channel;
pub mod config;
pub mod metrics;
pub mod monitor;
pub mod security;
pub mod tracing;

// Re-export the types most callers touch
pub use audit::{AuditRecord, AuditSink};
pub use channel::{ChannelError, Message, SecureChannel};
pub use config::DaemonConfig;
pub use monitor::{EventChannel, KernelMonitor, SecurityEvent};
pub use security::{SecurityLevel, SecurityOrchestrator};
