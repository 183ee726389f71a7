//! Multi-dimensional resource quotas keyed by execution id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Ceilings for one execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub max_cpu_time_ms: u64,
    pub max_disk_bytes: u64,
    pub max_api_calls: u64,
    pub max_concurrent_ops: u64,
}

impl Default for ResourceQuota {
    fn default() -> Self {
        Self {
            max_cpu_time_ms: 60_000,
            max_disk_bytes: 100 * 1024 * 1024,
            max_api_calls: 1_000,
            max_concurrent_ops: 5,
        }
    }
}

/// Running totals for one execution id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub cpu_time_ms: u64,
    pub disk_bytes: u64,
    pub api_calls: u64,
    pub concurrent_ops: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDimension {
    CpuTime,
    DiskBytes,
    ApiCalls,
    ConcurrentOps,
}

impl std::fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CpuTime => write!(f, "cpu_time_ms"),
            Self::DiskBytes => write!(f, "disk_bytes"),
            Self::ApiCalls => write!(f, "api_calls"),
            Self::ConcurrentOps => write!(f, "concurrent_ops"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaViolation {
    pub dimension: QuotaDimension,
    pub used: u64,
    pub limit: u64,
}

impl std::fmt::Display for QuotaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} usage {} exceeds quota {}",
            self.dimension, self.used, self.limit
        )
    }
}

impl QuotaUsage {
    /// Every dimension above its ceiling.
    pub fn violations(&self, quota: &ResourceQuota) -> Vec<QuotaViolation> {
        [
            (QuotaDimension::CpuTime, self.cpu_time_ms, quota.max_cpu_time_ms),
            (QuotaDimension::DiskBytes, self.disk_bytes, quota.max_disk_bytes),
            (QuotaDimension::ApiCalls, self.api_calls, quota.max_api_calls),
            (
                QuotaDimension::ConcurrentOps,
                self.concurrent_ops,
                quota.max_concurrent_ops,
            ),
        ]
        .into_iter()
        .filter(|(_, used, limit)| used > limit)
        .map(|(dimension, used, limit)| QuotaViolation {
            dimension,
            used,
            limit,
        })
        .collect()
    }
}

/// Accumulates usage per execution id.
///
/// Entries are created on first use and only removed by [`ResourceQuotaManager::clear`].
#[derive(Debug, Default)]
pub struct ResourceQuotaManager {
    usage: Mutex<HashMap<String, QuotaUsage>>,
}

impl ResourceQuotaManager {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F: FnOnce(&mut QuotaUsage)>(&self, execution_id: &str, f: F) -> QuotaUsage {
        let mut usage = self.usage.lock().await;
        let entry = usage.entry(execution_id.to_string()).or_default();
        f(entry);
        entry.clone()
    }

    pub async fn record_cpu_time(&self, execution_id: &str, ms: u64) -> QuotaUsage {
        self.update(execution_id, |u| u.cpu_time_ms = u.cpu_time_ms.saturating_add(ms))
            .await
    }

    pub async fn record_disk_bytes(&self, execution_id: &str, bytes: u64) -> QuotaUsage {
        self.update(execution_id, |u| u.disk_bytes = u.disk_bytes.saturating_add(bytes))
            .await
    }

    pub async fn record_api_call(&self, execution_id: &str) -> QuotaUsage {
        self.update(execution_id, |u| u.api_calls = u.api_calls.saturating_add(1))
            .await
    }

    /// Apply a signed delta to the concurrent-operation count (floored at zero).
    pub async fn adjust_concurrent(&self, execution_id: &str, delta: i64) -> QuotaUsage {
        self.update(execution_id, |u| {
            u.concurrent_ops = if delta >= 0 {
                u.concurrent_ops.saturating_add(delta.unsigned_abs())
            } else {
                u.concurrent_ops.saturating_sub(delta.unsigned_abs())
            };
        })
        .await
    }

    pub async fn usage(&self, execution_id: &str) -> Option<QuotaUsage> {
        self.usage.lock().await.get(execution_id).cloned()
    }

    /// Compare running totals for `execution_id` against `quota`.
    pub async fn check(&self, execution_id: &str, quota: &ResourceQuota) -> Vec<QuotaViolation> {
        self.usage(execution_id)
            .await
            .map(|u| u.violations(quota))
            .unwrap_or_default()
    }

    pub async fn clear(&self, execution_id: &str) {
        self.usage.lock().await.remove(execution_id);
    }

    pub async fn tracked_ids(&self) -> usize {
        self.usage.lock().await.len()
    }
}
