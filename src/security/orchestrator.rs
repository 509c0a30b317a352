//! Security orchestrator: level state machine and privilege enforcement
//!
//! Holds the active [`SecurityLevel`] and is the sole writer of
//! capability-drop state at startup. Level reads vastly outnumber writes,
//! so the level lives behind a read-write lock and every caller takes a
//! consistent snapshot; no request is ever evaluated against a level
//! mid-transition.
//!
//! `enforce_capabilities` failing is the one non-recoverable condition in
//! this subsystem: a daemon that cannot verify its own privilege reduction
//! must not serve, because continuing with excess privilege defeats the
//! point of everything downstream.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use caps::Capability;

use super::capabilities::{self, CapabilityDropper};
use super::level::{LevelPolicy, SecurityLevel};
use crate::audit::{AuditRecord, AuditSink};
use crate::monitor::event::{SecurityEvent, Severity};

/// Orchestrator failures.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Capability reduction failed or could not be verified. Fatal.
    PrivilegeSetupFailed(String),
    /// A level transition was refused; the previous level stays active.
    TransitionDenied {
        from: SecurityLevel,
        to: SecurityLevel,
        reason: String,
    },
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::PrivilegeSetupFailed(reason) => {
                write!(f, "privilege setup failed: {}", reason)
            }
            OrchestratorError::TransitionDenied { from, to, reason } => {
                write!(f, "transition {} -> {} denied: {}", from, to, reason)
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}

/// What the policy wants done with an operation behind a flagged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accept,
    Throttle,
    Drop,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Accept => "accept",
            Disposition::Throttle => "throttle",
            Disposition::Drop => "drop",
        }
    }
}

/// Holds the active level, derives policy, owns capability enforcement.
pub struct SecurityOrchestrator {
    level: RwLock<SecurityLevel>,
    /// Configured window-threshold override; survives level transitions
    max_events_override: Option<u32>,
    audit: Arc<AuditSink>,
    enforced: AtomicBool,
}

impl SecurityOrchestrator {
    pub fn new(level: SecurityLevel, audit: Arc<AuditSink>) -> Self {
        Self {
            level: RwLock::new(level),
            max_events_override: None,
            audit,
            enforced: AtomicBool::new(false),
        }
    }

    /// Override the active level's `max_events_per_window` with a
    /// configured value. Every policy snapshot carries the override.
    pub fn with_max_events_override(mut self, max_events: Option<u32>) -> Self {
        self.max_events_override = max_events;
        self
    }

    /// Consistent snapshot of the active level.
    pub fn level(&self) -> SecurityLevel {
        *self.level.read().expect("level lock poisoned")
    }

    /// Consistent snapshot of the active policy, with the configured
    /// threshold override applied.
    pub fn policy(&self) -> LevelPolicy {
        let mut policy = self.level().policy();
        if let Some(max_events) = self.max_events_override {
            policy.max_events_per_window = max_events;
        }
        policy
    }

    /// Whether capability enforcement has completed successfully. The
    /// daemon must not enter its serving state before this is true.
    pub fn is_enforced(&self) -> bool {
        self.enforced.load(Ordering::Acquire)
    }

    /// Transition to a new level. Any level may transition to any other,
    /// but every transition is audited and re-validates that the current
    /// process capability set satisfies the new level's requirements.
    pub fn set_level(&self, new_level: SecurityLevel) -> Result<(), OrchestratorError> {
        self.set_level_with(new_level, || {
            capabilities::forbidden_still_present(new_level.policy().forbidden_caps)
        })
    }

    /// Level transition with an injectable capability read-back (the real
    /// one in production, controlled ones in tests).
    ///
    /// Every attempt lands in the audit trail, denied ones included: an
    /// unreadable capability set denies the transition exactly like a
    /// leftover forbidden capability does.
    pub fn set_level_with(
        &self,
        new_level: SecurityLevel,
        verify: impl FnOnce() -> Result<Vec<Capability>, io::Error>,
    ) -> Result<(), OrchestratorError> {
        let mut level = self.level.write().expect("level lock poisoned");
        let from = *level;

        let leftover = match verify() {
            Ok(leftover) => leftover,
            Err(e) => {
                let reason = format!("capability set unreadable: {}", e);
                self.audit
                    .emit(AuditRecord::level_transition(from, new_level, false, &reason));
                return Err(OrchestratorError::TransitionDenied {
                    from,
                    to: new_level,
                    reason,
                });
            }
        };
        if !leftover.is_empty() {
            let reason = format!("forbidden capabilities present: {}", cap_names(&leftover));
            self.audit
                .emit(AuditRecord::level_transition(from, new_level, false, &reason));
            return Err(OrchestratorError::TransitionDenied {
                from,
                to: new_level,
                reason,
            });
        }

        self.audit
            .emit(AuditRecord::level_transition(from, new_level, true, "ok"));
        *level = new_level;
        tracing::info!(from = %from, to = %new_level, "security level transition");
        Ok(())
    }

    /// Drop every capability outside the active level's required set, then
    /// verify the reduction took. Called once at startup, before serving.
    pub fn enforce_capabilities(&self) -> Result<(), OrchestratorError> {
        let policy = self.policy();
        let dropper = CapabilityDropper::keeping(policy.required_caps);
        self.enforce_with(
            || dropper.apply(),
            || capabilities::forbidden_still_present(policy.forbidden_caps),
        )
    }

    /// Enforcement with injectable drop/verify steps (the real ones in
    /// production, controlled ones in tests).
    pub fn enforce_with(
        &self,
        drop_caps: impl FnOnce() -> Result<(), io::Error>,
        verify: impl FnOnce() -> Result<Vec<Capability>, io::Error>,
    ) -> Result<(), OrchestratorError> {
        let level = self.level();

        if let Err(e) = drop_caps() {
            let reason = format!("capability drop failed: {}", e);
            self.audit.emit(AuditRecord::fatal("privilege_setup", &reason));
            return Err(OrchestratorError::PrivilegeSetupFailed(reason));
        }

        match verify() {
            Ok(leftover) if leftover.is_empty() => {
                self.enforced.store(true, Ordering::Release);
                self.audit.emit(AuditRecord::startup(level));
                tracing::info!(
                    level = %level,
                    caps = %capabilities::describe_current_caps(),
                    "capability enforcement verified"
                );
                Ok(())
            }
            Ok(leftover) => {
                let reason = format!(
                    "forbidden capabilities survived the drop: {}",
                    cap_names(&leftover)
                );
                self.audit.emit(AuditRecord::fatal("privilege_setup", &reason));
                Err(OrchestratorError::PrivilegeSetupFailed(reason))
            }
            Err(e) => {
                let reason = format!("capability verification unreadable: {}", e);
                self.audit.emit(AuditRecord::fatal("privilege_setup", &reason));
                Err(OrchestratorError::PrivilegeSetupFailed(reason))
            }
        }
    }

    /// Policy disposition for one security event. Classification signals
    /// (rate flags, escalations) turn into drops only where the active
    /// level asks for it; the operation itself is never blocked here for
    /// lower severities.
    pub fn disposition(&self, event: &SecurityEvent) -> Disposition {
        let policy = self.policy();
        match event.severity {
            Severity::High | Severity::Critical if policy.drop_on_anomaly => Disposition::Drop,
            Severity::High | Severity::Critical => Disposition::Throttle,
            _ => Disposition::Accept,
        }
    }
}

fn cap_names(caps: &[Capability]) -> String {
    caps.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::event::{EventType, ProcessIdentity};

    fn orchestrator(level: SecurityLevel) -> (SecurityOrchestrator, Arc<AuditSink>) {
        let audit = Arc::new(AuditSink::new());
        (SecurityOrchestrator::new(level, Arc::clone(&audit)), audit)
    }

    fn event(severity: Severity) -> SecurityEvent {
        let who = ProcessIdentity::new(1, 1000, 1000, "proc");
        SecurityEvent::new(EventType::NetlinkAnomaly, severity, &who)
    }

    #[test]
    fn test_enforcement_success_marks_ready() {
        let (orchestrator, audit) = orchestrator(SecurityLevel::Standard);
        assert!(!orchestrator.is_enforced());
        orchestrator
            .enforce_with(|| Ok(()), || Ok(Vec::new()))
            .expect("enforcement");
        assert!(orchestrator.is_enforced());
        assert!(audit.len() >= 1);
    }

    #[test]
    fn test_forbidden_leftover_is_fatal() {
        let (orchestrator, audit) = orchestrator(SecurityLevel::Standard);
        let result = orchestrator.enforce_with(
            || Ok(()),
            || Ok(vec![Capability::CAP_SYS_ADMIN]),
        );
        assert!(matches!(
            result,
            Err(OrchestratorError::PrivilegeSetupFailed(_))
        ));
        // Never reaches the serving state
        assert!(!orchestrator.is_enforced());
        assert!(audit.len() >= 1);
    }

    #[test]
    fn test_drop_failure_is_fatal() {
        let (orchestrator, _audit) = orchestrator(SecurityLevel::Standard);
        let result = orchestrator.enforce_with(
            || Err(io::Error::new(io::ErrorKind::PermissionDenied, "EPERM")),
            || Ok(Vec::new()),
        );
        assert!(matches!(
            result,
            Err(OrchestratorError::PrivilegeSetupFailed(_))
        ));
        assert!(!orchestrator.is_enforced());
    }

    #[test]
    fn test_unreadable_verification_is_fatal() {
        let (orchestrator, _audit) = orchestrator(SecurityLevel::Standard);
        let result = orchestrator.enforce_with(
            || Ok(()),
            || Err(io::Error::new(io::ErrorKind::Other, "no /proc")),
        );
        assert!(matches!(
            result,
            Err(OrchestratorError::PrivilegeSetupFailed(_))
        ));
    }

    #[test]
    fn test_set_level_audited() {
        let (orchestrator, audit) = orchestrator(SecurityLevel::Standard);
        // On an unprivileged test process no forbidden caps are present,
        // so any-to-any transitions go through
        orchestrator.set_level(SecurityLevel::Paranoid).expect("transition");
        assert_eq!(orchestrator.level(), SecurityLevel::Paranoid);
        orchestrator.set_level(SecurityLevel::Development).expect("transition");
        assert_eq!(orchestrator.level(), SecurityLevel::Development);
        assert_eq!(audit.len(), 2);
    }

    #[test]
    fn test_unreadable_caps_denies_and_audits_transition() {
        let (orchestrator, audit) = orchestrator(SecurityLevel::Standard);
        let result = orchestrator.set_level_with(SecurityLevel::Paranoid, || {
            Err(io::Error::new(io::ErrorKind::Other, "no /proc"))
        });
        assert!(matches!(
            result,
            Err(OrchestratorError::TransitionDenied { .. })
        ));
        // Denied transitions are audited like applied ones
        assert_eq!(audit.len(), 1);
        let record = &audit.recent(1)[0];
        assert_eq!(record.detail["applied"], false);
        assert_eq!(record.detail["to"], "paranoid");
        // The previous level stays active
        assert_eq!(orchestrator.level(), SecurityLevel::Standard);
    }

    #[test]
    fn test_max_events_override_folds_into_policy() {
        let audit = Arc::new(AuditSink::new());
        let orchestrator = SecurityOrchestrator::new(SecurityLevel::Standard, Arc::clone(&audit))
            .with_max_events_override(Some(3));
        assert_eq!(orchestrator.policy().max_events_per_window, 3);

        // The override survives a level transition
        orchestrator
            .set_level_with(SecurityLevel::Paranoid, || Ok(Vec::new()))
            .expect("transition");
        assert_eq!(orchestrator.policy().max_events_per_window, 3);
        // Everything else still comes from the level
        assert!(orchestrator.policy().drop_on_anomaly);
    }

    #[test]
    fn test_disposition_follows_policy() {
        let (paranoid, _) = orchestrator(SecurityLevel::Paranoid);
        assert_eq!(paranoid.disposition(&event(Severity::High)), Disposition::Drop);
        assert_eq!(paranoid.disposition(&event(Severity::Medium)), Disposition::Accept);

        let (standard, _) = orchestrator(SecurityLevel::Standard);
        assert_eq!(standard.disposition(&event(Severity::High)), Disposition::Throttle);
        assert_eq!(standard.disposition(&event(Severity::Low)), Disposition::Accept);
    }
}
