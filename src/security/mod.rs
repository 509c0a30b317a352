//! Security policy: levels, capability reduction, orchestration
//!
//! The orchestrator is the policy brain of the daemon: it owns the active
//! [`SecurityLevel`], derives enforcement parameters from it, performs the
//! one-time startup capability drop, and decides the disposition of every
//! flagged event the monitor produces.

pub mod capabilities;
pub mod level;
pub mod orchestrator;

pub use capabilities::{describe_current_caps, CapabilityDropper};
pub use level::{LevelPolicy, SecurityLevel};
pub use orchestrator::{Disposition, OrchestratorError, SecurityOrchestrator};
