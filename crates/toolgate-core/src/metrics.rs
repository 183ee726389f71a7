//! Atomic counters for sandbox observability.
//!
//! Each [`SandboxManager`](crate::SandboxManager) owns one [`SandboxMetrics`].
//! Counters are incremented silently at the call site; call
//! [`SandboxMetrics::flush`] to emit current values as a single
//! `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lightweight atomic counters, no allocations and no locking.
#[derive(Debug, Default)]
pub struct SandboxMetrics {
    executions_started: AtomicU64,
    executions_succeeded: AtomicU64,
    executions_failed: AtomicU64,
    executions_blocked: AtomicU64,
    executions_timed_out: AtomicU64,
    violations_recorded: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub executions_started: u64,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    pub executions_blocked: u64,
    pub executions_timed_out: u64,
    pub violations_recorded: u64,
}

impl SandboxMetrics {
    pub const fn new() -> Self {
        Self {
            executions_started: AtomicU64::new(0),
            executions_succeeded: AtomicU64::new(0),
            executions_failed: AtomicU64::new(0),
            executions_blocked: AtomicU64::new(0),
            executions_timed_out: AtomicU64::new(0),
            violations_recorded: AtomicU64::new(0),
        }
    }

    pub fn inc_started(&self) {
        self.executions_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_started", "counter incremented");
    }

    pub fn inc_succeeded(&self) {
        self.executions_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_succeeded", "counter incremented");
    }

    /// Executor ran and failed, or timed out.
    pub fn inc_failed(&self) {
        self.executions_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_failed", "counter incremented");
    }

    /// Rejected before the executor started.
    pub fn inc_blocked(&self) {
        self.executions_blocked.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_blocked", "counter incremented");
    }

    pub fn inc_timed_out(&self) {
        self.executions_timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_timed_out", "counter incremented");
    }

    pub fn add_violations(&self, n: u64) {
        if n == 0 {
            return;
        }
        self.violations_recorded.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "violations_recorded", n, "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            executions_started: self.executions_started.load(Ordering::Relaxed),
            executions_succeeded: self.executions_succeeded.load(Ordering::Relaxed),
            executions_failed: self.executions_failed.load(Ordering::Relaxed),
            executions_blocked: self.executions_blocked.load(Ordering::Relaxed),
            executions_timed_out: self.executions_timed_out.load(Ordering::Relaxed),
            violations_recorded: self.violations_recorded.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a session, shutdown) rather
    /// than on every increment.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            executions_started = s.executions_started,
            executions_succeeded = s.executions_succeeded,
            executions_failed = s.executions_failed,
            executions_blocked = s.executions_blocked,
            executions_timed_out = s.executions_timed_out,
            violations_recorded = s.violations_recorded,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = SandboxMetrics::new();
        m.inc_started();
        m.inc_started();
        m.inc_succeeded();
        m.inc_blocked();
        m.add_violations(3);
        m.add_violations(0);

        let s = m.snapshot();
        assert_eq!(s.executions_started, 2);
        assert_eq!(s.executions_succeeded, 1);
        assert_eq!(s.executions_blocked, 1);
        assert_eq!(s.violations_recorded, 3);
        assert_eq!(s.executions_failed, 0);
    }

    #[test]
    fn instances_are_independent() {
        let a = SandboxMetrics::new();
        let b = SandboxMetrics::new();
        a.inc_timed_out();
        assert_eq!(a.snapshot().executions_timed_out, 1);
        assert_eq!(b.snapshot().executions_timed_out, 0);
    }
}
