//! Execution results and the timeout race around an executor.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::capability::{CapabilitySet, SandboxMode};
use super::error::SandboxError;
use super::violation::{Violation, ViolationKind};

/// Facts about one execution, attached to every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub execution_id: String,
    pub tool: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub mode: SandboxMode,
    pub capabilities_used: CapabilitySet,
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_call_depth: Option<usize>,
}

/// The result of a sandboxed tool execution.
///
/// `data` is present iff `success`; `error` is present iff not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SandboxError>,
    pub metadata: ExecutionMetadata,
}

impl ExecutionResult {
    pub fn succeeded(data: Value, metadata: ExecutionMetadata) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata,
        }
    }

    pub fn failed(error: SandboxError, metadata: ExecutionMetadata) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            metadata,
        }
    }

    pub fn violations_of(&self, kind: ViolationKind) -> impl Iterator<Item = &Violation> {
        self.metadata
            .violations
            .iter()
            .filter(move |v| v.kind == kind)
    }
}

/// How the race between an executor and its timer ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RaceOutcome {
    Completed(Value),
    Failed(String),
    TimedOut,
}

/// Run `executor(args)` on its own task and race it against `timeout`.
///
/// The executor is **not** cancelled when the timer wins: its task is
/// detached and keeps running to completion, and its result is discarded.
/// Callers must treat a timeout as "the side effect may or may not have
/// happened". A panicking executor is reported as [`RaceOutcome::Failed`].
pub async fn race_with_timeout<F, Fut, E>(timeout: Duration, executor: F, args: Value) -> RaceOutcome
where
    F: FnOnce(Value) -> Fut,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let handle = tokio::spawn(executor(args));
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(value))) => RaceOutcome::Completed(value),
        Ok(Ok(Err(err))) => RaceOutcome::Failed(err.to_string()),
        Ok(Err(join_err)) => RaceOutcome::Failed(describe_join_error(join_err)),
        Err(_elapsed) => RaceOutcome::TimedOut,
    }
}

fn describe_join_error(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "executor task was cancelled".to_string();
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("executor panicked: {detail}")
}

/// Build a [`SandboxError`] for a timed-out race.
pub fn timeout_error(timeout: Duration) -> SandboxError {
    SandboxError::timeout(timeout.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_race_completes() {
        let out = race_with_timeout(
            Duration::from_millis(500),
            |args| async move { Ok::<_, String>(args) },
            serde_json::json!({"x": 1}),
        )
        .await;
        assert_eq!(out, RaceOutcome::Completed(serde_json::json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_race_reports_executor_error() {
        let out = race_with_timeout(
            Duration::from_millis(500),
            |_| async { Err::<Value, _>("disk full") },
            Value::Null,
        )
        .await;
        assert_eq!(out, RaceOutcome::Failed("disk full".into()));
    }

    #[tokio::test]
    async fn test_race_reports_panic() {
        let out = race_with_timeout(
            Duration::from_millis(500),
            |_| async {
                if true {
                    panic!("kaboom");
                }
                Ok::<Value, String>(Value::Null)
            },
            Value::Null,
        )
        .await;
        match out {
            RaceOutcome::Failed(msg) => assert!(msg.contains("kaboom"), "{msg}"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_cancel_executor() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let out = race_with_timeout(
            Duration::from_millis(50),
            move |_| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, String>(Value::Null)
            },
            Value::Null,
        )
        .await;
        assert_eq!(out, RaceOutcome::TimedOut);
        assert!(!finished.load(Ordering::SeqCst));

        // The detached task still runs to completion.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_timeout_error_shape() {
        let err = timeout_error(Duration::from_millis(75));
        assert_eq!(err.code, "TIMEOUT");
        assert!(err.message.contains("75ms"));
    }
}
