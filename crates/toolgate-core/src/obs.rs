//! Structured lifecycle events for sandboxed executions.
//!
//! Every event carries an `event = "sandbox.*"` field so log pipelines can
//! select them without parsing messages.

use tracing::{info, warn};

use crate::sandbox::violation::Violation;

pub fn emit_execution_started(execution_id: &str, tool: &str, mode: &str) {
    info!(
        event = "sandbox.execution_started",
        execution_id = %execution_id,
        tool = %tool,
        mode = %mode,
    );
}

pub fn emit_execution_finished(
    execution_id: &str,
    tool: &str,
    duration_ms: u64,
    success: bool,
    violations: usize,
) {
    info!(
        event = "sandbox.execution_finished",
        execution_id = %execution_id,
        tool = %tool,
        duration_ms = duration_ms,
        success = success,
        violations = violations,
    );
}

/// Emit event: the request was rejected before the executor ran.
pub fn emit_policy_denied(execution_id: &str, tool: &str, code: &str, reason: &str) {
    warn!(
        event = "sandbox.policy_denied",
        execution_id = %execution_id,
        tool = %tool,
        code = %code,
        reason = %reason,
    );
}

pub fn emit_violation(execution_id: &str, violation: &Violation) {
    warn!(
        event = "sandbox.violation",
        execution_id = %execution_id,
        kind = %violation.kind,
        severity = %violation.severity,
        message = %violation.message,
    );
}
