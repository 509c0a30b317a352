//! Security levels and the policy each one derives
//!
//! The level is an explicit finite-state value; everything policy-shaped
//! (thresholds, drop behavior, capability sets) is derived from it in one
//! place rather than checked ad hoc around the codebase.

use caps::Capability;
use serde::{Deserialize, Serialize};

/// Operating posture of the daemon. Set once at startup from
/// configuration; changed at runtime only through the orchestrator's
/// audited `set_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Maximum security, minimal tolerance
    Paranoid,
    /// Balanced posture for corporate deployments
    Enterprise,
    /// Default secure operation
    Standard,
    /// Reduced friction for testing
    Development,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Paranoid => "paranoid",
            SecurityLevel::Enterprise => "enterprise",
            SecurityLevel::Standard => "standard",
            SecurityLevel::Development => "development",
        }
    }

    /// The fixed policy tuple for this level.
    pub fn policy(&self) -> LevelPolicy {
        match self {
            SecurityLevel::Paranoid => LevelPolicy {
                max_events_per_window: 10,
                drop_on_anomaly: true,
                required_caps: REQUIRED_CAPS,
                forbidden_caps: PARANOID_FORBIDDEN_CAPS,
            },
            SecurityLevel::Enterprise => LevelPolicy {
                max_events_per_window: 25,
                drop_on_anomaly: false,
                required_caps: REQUIRED_CAPS,
                forbidden_caps: DEFAULT_FORBIDDEN_CAPS,
            },
            SecurityLevel::Standard => LevelPolicy {
                max_events_per_window: 50,
                drop_on_anomaly: false,
                required_caps: REQUIRED_CAPS,
                forbidden_caps: DEFAULT_FORBIDDEN_CAPS,
            },
            SecurityLevel::Development => LevelPolicy {
                max_events_per_window: 200,
                drop_on_anomaly: false,
                required_caps: REQUIRED_CAPS,
                forbidden_caps: &[],
            },
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The daemon configures networks; these are the only root powers it keeps.
pub const REQUIRED_CAPS: &[Capability] =
    &[Capability::CAP_NET_ADMIN, Capability::CAP_NET_RAW];

/// CAP_SYS_ADMIN is the classic network-manager over-grant; its presence
/// after startup means privilege reduction failed.
pub const DEFAULT_FORBIDDEN_CAPS: &[Capability] = &[Capability::CAP_SYS_ADMIN];

/// Paranoid additionally refuses to run with debugger/module powers.
pub const PARANOID_FORBIDDEN_CAPS: &[Capability] = &[
    Capability::CAP_SYS_ADMIN,
    Capability::CAP_SYS_PTRACE,
    Capability::CAP_SYS_MODULE,
];

/// Enforcement parameters derived from a [`SecurityLevel`].
#[derive(Debug, Clone, Copy)]
pub struct LevelPolicy {
    /// Rate-limiter threshold per identity per window
    pub max_events_per_window: u32,
    /// Whether flagged packets are denied at admission
    pub drop_on_anomaly: bool,
    /// Capabilities the process must retain to do its job
    pub required_caps: &'static [Capability],
    /// Capabilities whose presence after setup is a fatal defect
    pub forbidden_caps: &'static [Capability],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paranoid_is_strictest() {
        let paranoid = SecurityLevel::Paranoid.policy();
        let dev = SecurityLevel::Development.policy();
        assert!(paranoid.max_events_per_window < dev.max_events_per_window);
        assert!(paranoid.drop_on_anomaly);
        assert!(!dev.drop_on_anomaly);
        assert!(paranoid.forbidden_caps.len() > dev.forbidden_caps.len());
    }

    #[test]
    fn test_all_levels_require_network_caps() {
        for level in [
            SecurityLevel::Paranoid,
            SecurityLevel::Enterprise,
            SecurityLevel::Standard,
            SecurityLevel::Development,
        ] {
            let policy = level.policy();
            assert!(policy.required_caps.contains(&Capability::CAP_NET_ADMIN));
            assert!(policy.required_caps.contains(&Capability::CAP_NET_RAW));
        }
    }

    #[test]
    fn test_serde_names() {
        let level: SecurityLevel = serde_json::from_str("\"paranoid\"").unwrap();
        assert_eq!(level, SecurityLevel::Paranoid);
        assert_eq!(serde_json::to_string(&SecurityLevel::Standard).unwrap(), "\"standard\"");
    }
}
