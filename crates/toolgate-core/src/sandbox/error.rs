//! Error types for the sandbox module.
//!
//! Every failure the manager reports to a caller is a [`SandboxError`]: a
//! closed [`ErrorKind`], a stable machine-readable `code`, a human message and
//! optional structured details. Executor failures are normalised into this
//! shape and never escape as a bare error.

use serde::{Deserialize, Serialize};

/// Closed failure taxonomy surfaced in `ExecutionResult::error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed config or disallowed path argument.
    Validation,
    /// Permission denied (capability or network policy).
    Capability,
    /// Executor exceeded its allotted time.
    Timeout,
    /// Quota, memory or call-depth ceiling hit before execution.
    Resource,
    /// The executor itself failed.
    Execution,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Capability => write!(f, "capability"),
            Self::Timeout => write!(f, "timeout"),
            Self::Resource => write!(f, "resource"),
            Self::Execution => write!(f, "execution"),
        }
    }
}

/// Stable error codes.
pub mod codes {
    pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
    pub const PATH_NOT_ALLOWED: &str = "PATH_NOT_ALLOWED";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const NETWORK_DENIED: &str = "NETWORK_DENIED";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const MEMORY_LIMIT_EXCEEDED: &str = "MEMORY_LIMIT_EXCEEDED";
    pub const CALL_DEPTH_EXCEEDED: &str = "CALL_DEPTH_EXCEEDED";
    pub const QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";
    pub const EXECUTION_FAILED: &str = "EXECUTION_FAILED";
}

/// A structured sandbox failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} error [{code}]: {message}")]
pub struct SandboxError {
    pub code: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl SandboxError {
    pub fn new(kind: ErrorKind, code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            kind,
            details: None,
        }
    }

    /// Attach structured details (builder pattern).
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, codes::INVALID_CONFIG, message)
    }

    pub fn path_not_allowed(path: &str) -> Self {
        Self::new(
            ErrorKind::Validation,
            codes::PATH_NOT_ALLOWED,
            format!("path '{path}' is outside the allowed paths"),
        )
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capability, codes::PERMISSION_DENIED, message)
    }

    pub fn network_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capability, codes::NETWORK_DENIED, message)
    }

    pub fn timeout(limit_ms: u64) -> Self {
        Self::new(
            ErrorKind::Timeout,
            codes::TIMEOUT,
            format!("tool execution timed out after {limit_ms}ms"),
        )
        .with_details(serde_json::json!({ "limit_ms": limit_ms }))
    }

    pub fn resource(code: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, code, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, codes::EXECUTION_FAILED, message)
    }
}

/// Errors raised while parsing or validating a [`SandboxConfig`](super::config::SandboxConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("timeout {timeout_ms}ms is outside the allowed range 0..={max_ms}ms")]
    TimeoutOutOfRange { timeout_ms: u64, max_ms: u64 },

    #[error("invalid allowed path pattern '{pattern}': {reason}")]
    InvalidPathPattern { pattern: String, reason: String },

    #[error("malformed sandbox config: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<ConfigError> for SandboxError {
    fn from(err: ConfigError) -> Self {
        SandboxError::invalid_config(err.to_string())
    }
}
