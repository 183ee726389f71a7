//! Policy violations recorded during an execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which policy boundary was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Capability,
    Timeout,
    Memory,
    Path,
    Depth,
    Quota,
    Network,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capability => write!(f, "capability"),
            Self::Timeout => write!(f, "timeout"),
            Self::Memory => write!(f, "memory"),
            Self::Path => write!(f, "path"),
            Self::Depth => write!(f, "depth"),
            Self::Quota => write!(f, "quota"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Severity shared by violations and audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A recorded fact that a policy boundary was breached or approached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Violation {
    pub fn new(kind: ViolationKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Highest severity in a list, `None` when empty.
pub fn max_severity(violations: &[Violation]) -> Option<Severity> {
    violations.iter().map(|v| v.severity).max()
}
