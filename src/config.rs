//! Daemon configuration surface
//!
//! The core consumes one enumerated security level plus a handful of
//! optional overrides. The file is JSON; a missing file gets defaults
//! written back so a fresh install has something to edit.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::monitor::privilege::DEFAULT_ESCALATION_GAP;
use crate::monitor::rate::DEFAULT_WINDOW;
use crate::monitor::DEFAULT_CHANNEL_CAPACITY;
use crate::security::SecurityLevel;

/// Default config location, matching the packaging layout.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/alopex/alopexd.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Operating posture; see [`SecurityLevel`]
    pub security_level: SecurityLevel,
    /// Override the level's per-identity window threshold
    pub max_events_per_window: Option<u32>,
    /// Override the privilege escalation gap (default 1000 ms)
    pub escalation_gap_ms: Option<u64>,
    /// Rate window length in seconds (default 60)
    pub rate_window_secs: u64,
    /// Event channel capacity (default 1024)
    pub event_channel_capacity: usize,
    /// Per-call receive bound in milliseconds (default 5000)
    pub receive_timeout_ms: u64,
    /// Session idle bound in seconds (default 300)
    pub session_idle_timeout_secs: u64,
    /// OTLP collector endpoint; None means fmt-only logging
    pub otlp_endpoint: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            security_level: SecurityLevel::Standard,
            max_events_per_window: None,
            escalation_gap_ms: None,
            rate_window_secs: DEFAULT_WINDOW.as_secs(),
            event_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            receive_timeout_ms: 5_000,
            session_idle_timeout_secs: 300,
            otlp_endpoint: None,
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, writing defaults back when the file is absent.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| ConfigError::Parse(path.to_string(), e.to_string())),
            Err(_) => {
                let config = Self::default();
                if let Some(parent) = Path::new(path).parent() {
                    let _ = fs::create_dir_all(parent);
                }
                let serialized = serde_json::to_string_pretty(&config)
                    .map_err(|e| ConfigError::Parse(path.to_string(), e.to_string()))?;
                let _ = fs::write(path, serialized);
                Ok(config)
            }
        }
    }

    pub fn escalation_gap(&self) -> Duration {
        self.escalation_gap_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_ESCALATION_GAP)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(String, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse(path, reason) => {
                write!(f, "failed to parse config {}: {}", path, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.security_level, SecurityLevel::Standard);
        assert_eq!(config.max_events_per_window, None);
        assert_eq!(config.escalation_gap(), Duration::from_secs(1));
        assert_eq!(config.rate_window(), Duration::from_secs(60));
    }

    #[test]
    fn test_overrides_parse() {
        let config: DaemonConfig = serde_json::from_str(
            r#"{ "security_level": "paranoid", "max_events_per_window": 3, "escalation_gap_ms": 250 }"#,
        )
        .unwrap();
        assert_eq!(config.max_events_per_window, Some(3));
        assert_eq!(config.escalation_gap(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_file_parses() {
        let config: DaemonConfig =
            serde_json::from_str(r#"{ "security_level": "enterprise" }"#).unwrap();
        assert_eq!(config.security_level, SecurityLevel::Enterprise);
        assert_eq!(config.max_events_per_window, None);
    }
}
