//! Append-only, bounded audit log of sandboxed execution outcomes.
//!
//! Entries are immutable once written and leave the log only through FIFO
//! rollover (or an explicit [`AuditLogger::clear`]). A disabled logger drops
//! writes but never affects the execution being logged.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ring::BoundedLog;
use crate::sandbox::violation::Severity;

/// Default number of retained entries.
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    /// Rejected by policy before the executor ran.
    Blocked,
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// An immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub result: AuditOutcome,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The caller-supplied part of an entry; id and timestamp are assigned on write.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub tool: String,
    pub action: String,
    pub user: Option<String>,
    pub result: AuditOutcome,
    pub severity: Severity,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
}

impl AuditRecord {
    pub fn new(
        tool: impl Into<String>,
        action: impl Into<String>,
        result: AuditOutcome,
        severity: Severity,
    ) -> Self {
        Self {
            tool: tool.into(),
            action: action.into(),
            user: None,
            result,
            severity,
            reason: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Filter predicates; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub tool: Option<String>,
    pub user: Option<String>,
    pub result: Option<AuditOutcome>,
    pub severity: Option<Severity>,
    /// Entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches.
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.tool.as_deref().map_or(true, |t| entry.tool == t)
            && self
                .user
                .as_deref()
                .map_or(true, |u| entry.user.as_deref() == Some(u))
            && self.result.map_or(true, |r| entry.result == r)
            && self.severity.map_or(true, |s| entry.severity == s)
            && self.since.map_or(true, |since| entry.timestamp >= since)
    }
}

/// Aggregate counts over the retained entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: usize,
    pub by_result: BTreeMap<AuditOutcome, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_tool: BTreeMap<String, usize>,
}

#[derive(Debug)]
pub struct AuditLogger {
    entries: Mutex<BoundedLog<AuditLogEntry>>,
    enabled: AtomicBool,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BoundedLog::new(capacity)),
            enabled: AtomicBool::new(true),
        }
    }

    /// Append a record. Returns the written entry, or `None` when disabled.
    pub async fn log(&self, record: AuditRecord) -> Option<AuditLogEntry> {
        if !self.is_enabled() {
            return None;
        }
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            tool: record.tool,
            action: record.action,
            user: record.user,
            result: record.result,
            severity: record.severity,
            reason: record.reason,
            metadata: record.metadata,
        };
        self.entries.lock().await.push(entry.clone());
        Some(entry)
    }

    /// Matching entries, oldest first.
    pub async fn logs(&self, filter: &AuditFilter) -> Vec<AuditLogEntry> {
        let entries = self.entries.lock().await;
        let mut matched: Vec<AuditLogEntry> = entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    pub async fn stats(&self) -> AuditStats {
        let entries = self.entries.lock().await;
        let mut stats = AuditStats {
            total: entries.len(),
            ..AuditStats::default()
        };
        for e in entries.iter() {
            *stats.by_result.entry(e.result).or_insert(0) += 1;
            *stats.by_severity.entry(e.severity).or_insert(0) += 1;
            *stats.by_tool.entry(e.tool.clone()).or_insert(0) += 1;
        }
        stats
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(tool: &str, result: AuditOutcome, severity: Severity) -> AuditRecord {
        AuditRecord::new(tool, "execute", result, severity)
    }

    #[tokio::test]
    async fn test_log_assigns_id_and_timestamp() {
        let logger = AuditLogger::default();
        let a = logger
            .log(rec("read_file", AuditOutcome::Success, Severity::Low))
            .await
            .unwrap();
        let b = logger
            .log(rec("read_file", AuditOutcome::Success, Severity::Low))
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
        assert!(b.timestamp >= a.timestamp);
        assert_eq!(logger.len().await, 2);
    }

    #[tokio::test]
    async fn test_rollover_evicts_oldest() {
        let logger = AuditLogger::new(2);
        for tool in ["a", "b", "c"] {
            logger
                .log(rec(tool, AuditOutcome::Success, Severity::Low))
                .await;
        }
        let tools: Vec<String> = logger
            .logs(&AuditFilter::default())
            .await
            .into_iter()
            .map(|e| e.tool)
            .collect();
        assert_eq!(tools, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_filter_by_user_and_limit() {
        let logger = AuditLogger::default();
        for i in 0..4 {
            logger
                .log(
                    rec("t", AuditOutcome::Success, Severity::Low)
                        .with_user(if i % 2 == 0 { "alice" } else { "bob" })
                        .with_reason(format!("n{i}")),
                )
                .await;
        }
        let alice = logger
            .logs(&AuditFilter {
                user: Some("alice".into()),
                ..AuditFilter::default()
            })
            .await;
        assert_eq!(alice.len(), 2);

        let last = logger
            .logs(&AuditFilter {
                limit: Some(1),
                ..AuditFilter::default()
            })
            .await;
        assert_eq!(last[0].reason.as_deref(), Some("n3"));
    }

    #[tokio::test]
    async fn test_since_filter() {
        let logger = AuditLogger::default();
        logger
            .log(rec("old", AuditOutcome::Success, Severity::Low))
            .await;
        let cutoff = Utc::now() + chrono::Duration::seconds(3600);
        let none = logger
            .logs(&AuditFilter {
                since: Some(cutoff),
                ..AuditFilter::default()
            })
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_disable() {
        let logger = AuditLogger::default();
        logger
            .log(rec("a", AuditOutcome::Success, Severity::Low))
            .await;
        logger
            .log(rec("a", AuditOutcome::Blocked, Severity::Critical))
            .await;
        logger
            .log(rec("b", AuditOutcome::Failure, Severity::Medium))
            .await;

        let stats = logger.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_tool["a"], 2);
        assert_eq!(stats.by_result[&AuditOutcome::Blocked], 1);
        assert_eq!(stats.by_severity[&Severity::Medium], 1);

        logger.set_enabled(false);
        assert!(logger
            .log(rec("c", AuditOutcome::Success, Severity::Low))
            .await
            .is_none());
        assert_eq!(logger.len().await, 3);
    }
}
