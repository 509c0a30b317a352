//! Linux capability reduction and verification
//!
//! The daemon starts with whatever the service manager granted and must end
//! up holding at most the active level's required set. To fully shed a
//! capability it leaves three sets:
//!
//! ```text
//! ┌───────────────────┬─────────────────────────────────────────────┐
//! │  Effective (E)    │ caps the kernel checks right now            │
//! │  Permitted (P)    │ ceiling; caps that could be re-raised       │
//! │  Bounding  (B)    │ absolute limit, inherited by children       │
//! └───────────────────┴─────────────────────────────────────────────┘
//! ```
//!
//! Effective and Permitted drops must succeed; Bounding drops need
//! CAP_SETPCAP and are best-effort. What matters afterwards is the
//! verification read-back: a forbidden capability still present in the
//! Effective set means the reduction failed, and that is fatal upstream.

use std::io;

use caps::{CapSet, Capability, CapsHashSet};

/// Reduces the process capability sets down to a required set.
pub struct CapabilityDropper {
    required: CapsHashSet,
}

impl CapabilityDropper {
    /// Dropper that keeps only `required` capabilities.
    pub fn keeping(required: &[Capability]) -> Self {
        Self {
            required: required.iter().copied().collect(),
        }
    }

    /// Drop everything outside the required set from Effective, Permitted
    /// and (best-effort) Bounding.
    pub fn apply(&self) -> Result<(), io::Error> {
        let permitted = caps::read(None, CapSet::Permitted)
            .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e.to_string()))?;

        for cap in permitted {
            if self.required.contains(&cap) {
                continue;
            }
            // Bounding first so children cannot regain the cap; needs
            // CAP_SETPCAP, so a failure here is tolerated and caught by
            // the verification read-back instead
            let _ = caps::drop(None, CapSet::Bounding, cap);

            caps::drop(None, CapSet::Effective, cap)
                .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e.to_string()))?;
            caps::drop(None, CapSet::Permitted, cap)
                .map_err(|e| io::Error::new(io::ErrorKind::PermissionDenied, e.to_string()))?;
        }
        Ok(())
    }

    pub fn required(&self) -> &CapsHashSet {
        &self.required
    }
}

/// Forbidden capabilities still present in the Effective set, if any.
///
/// An unreadable capability set counts as a verification failure: the
/// caller must not assume reduction worked when it cannot be observed.
pub fn forbidden_still_present(
    forbidden: &[Capability],
) -> Result<Vec<Capability>, io::Error> {
    let effective = caps::read(None, CapSet::Effective)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    Ok(forbidden
        .iter()
        .copied()
        .filter(|cap| effective.contains(cap))
        .collect())
}

/// Render the current capability sets for logging.
pub fn describe_current_caps() -> String {
    let mut output = String::new();
    for (name, set) in [
        ("effective", CapSet::Effective),
        ("permitted", CapSet::Permitted),
        ("inheritable", CapSet::Inheritable),
    ] {
        match caps::read(None, set) {
            Ok(caps) if caps.is_empty() => output.push_str(&format!("{}=(none) ", name)),
            Ok(caps) => {
                let mut names: Vec<String> = caps.iter().map(|c| c.to_string()).collect();
                names.sort();
                output.push_str(&format!("{}={} ", name, names.join(",")));
            }
            Err(_) => output.push_str(&format!("{}=(unreadable) ", name)),
        }
    }
    output.trim_end().to_string()
}
