//! Capability evaluation engine: pure, stateless.

use serde::{Deserialize, Serialize};

use super::capability::{format_capabilities, CapabilitySet, SandboxMode};

/// Outcome of checking a required capability set against a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityCheck {
    pub allowed: bool,
    /// Every required capability that is not usable (ungranted or refused by mode).
    pub missing: CapabilitySet,
    /// The subset of `missing` refused because the mode is `Strict`.
    pub blocked_by_mode: CapabilitySet,
}

impl CapabilityCheck {
    /// Human-readable denial reason, `None` when allowed.
    pub fn reason(&self) -> Option<String> {
        if self.allowed {
            return None;
        }
        if !self.blocked_by_mode.is_empty() {
            return Some(format!(
                "strict mode forbids write capabilities: {}",
                format_capabilities(&self.blocked_by_mode)
            ));
        }
        Some(format!(
            "missing capabilities: {}",
            format_capabilities(&self.missing)
        ))
    }
}

/// Check `required` against `granted` under `mode`.
///
/// Under [`SandboxMode::Strict`] every write-type requirement is denied even
/// when granted. Otherwise the check fails iff `required \ granted` is not
/// empty.
pub fn check_capabilities(
    required: &CapabilitySet,
    granted: &CapabilitySet,
    mode: SandboxMode,
) -> CapabilityCheck {
    let blocked_by_mode: CapabilitySet = if mode == SandboxMode::Strict {
        required.iter().filter(|c| c.is_write()).copied().collect()
    } else {
        CapabilitySet::new()
    };

    let missing: CapabilitySet = required
        .iter()
        .filter(|c| blocked_by_mode.contains(c) || !granted.contains(c))
        .copied()
        .collect();

    CapabilityCheck {
        allowed: missing.is_empty(),
        missing,
        blocked_by_mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capability::Capability;

    fn set(caps: &[Capability]) -> CapabilitySet {
        caps.iter().copied().collect()
    }

    #[test]
    fn test_empty_requirement_always_allowed() {
        for mode in [SandboxMode::Strict, SandboxMode::Controlled, SandboxMode::Trusted] {
            let check = check_capabilities(&CapabilitySet::new(), &CapabilitySet::new(), mode);
            assert!(check.allowed);
            assert!(check.reason().is_none());
        }
    }

    #[test]
    fn test_missing_capability_denied() {
        let check = check_capabilities(
            &set(&[Capability::FsRead, Capability::FsWrite]),
            &set(&[Capability::FsRead]),
            SandboxMode::Controlled,
        );
        assert!(!check.allowed);
        assert_eq!(check.missing, set(&[Capability::FsWrite]));
        assert!(check.blocked_by_mode.is_empty());
        assert!(check.reason().unwrap().contains("fs:write"));
    }

    #[test]
    fn test_strict_denies_granted_write() {
        let granted: CapabilitySet = Capability::ALL.iter().copied().collect();
        let check = check_capabilities(
            &set(&[Capability::FsRead, Capability::StateWrite]),
            &granted,
            SandboxMode::Strict,
        );
        assert!(!check.allowed);
        assert_eq!(check.blocked_by_mode, set(&[Capability::StateWrite]));
        assert!(check.reason().unwrap().contains("strict mode"));
    }

    #[test]
    fn test_strict_allows_granted_reads() {
        let check = check_capabilities(
            &set(&[Capability::FsRead, Capability::MemoryRead]),
            &set(&[Capability::FsRead, Capability::MemoryRead]),
            SandboxMode::Strict,
        );
        assert!(check.allowed);
    }

    #[test]
    fn test_trusted_still_enforces_grant() {
        let check = check_capabilities(
            &set(&[Capability::ExecCommand]),
            &set(&[Capability::FsRead]),
            SandboxMode::Trusted,
        );
        assert!(!check.allowed);
        assert_eq!(check.missing, set(&[Capability::ExecCommand]));
    }
}
