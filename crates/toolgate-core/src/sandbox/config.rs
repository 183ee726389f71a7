//! Per-execution sandbox configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::monitor::{CallStackLimits, MemoryLimits, NetworkPolicy, ResourceQuota};

use super::capability::{CapabilitySet, SandboxMode};
use super::error::ConfigError;
use super::policy::PathWhitelist;

/// Upper bound for `timeout_ms`.
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Timeout applied when a config does not set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// The policy for one execution.
///
/// `mode` and `capabilities` are mandatory; everything else is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub mode: SandboxMode,
    pub capabilities: CapabilitySet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Glob-like patterns; empty means unrestricted.
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_quota: Option<ResourceQuota>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limits: Option<MemoryLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_stack_limits: Option<CallStackLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_policy: Option<NetworkPolicy>,
    /// Advisory; echoed but not enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<u64>,
    /// Advisory; echoed but not enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_call_depth: Option<usize>,
    /// Caller-owned key for quota and call-stack state. When set, the caller
    /// clears that state; when absent a fresh id is generated and released
    /// by the manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// When false the execution is still logged and counted, but no audit
    /// entry is written.
    #[serde(default = "default_audit")]
    pub audit: bool,
}

fn default_audit() -> bool {
    true
}

impl SandboxConfig {
    pub fn new(mode: SandboxMode, capabilities: CapabilitySet) -> Self {
        Self {
            mode,
            capabilities,
            timeout_ms: None,
            allowed_paths: Vec::new(),
            resource_quota: None,
            memory_limits: None,
            call_stack_limits: None,
            network_policy: None,
            max_memory: None,
            max_call_depth: None,
            execution_id: None,
            metadata: BTreeMap::new(),
            audit: true,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_allowed_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resource_quota(mut self, quota: ResourceQuota) -> Self {
        self.resource_quota = Some(quota);
        self
    }

    pub fn with_memory_limits(mut self, limits: MemoryLimits) -> Self {
        self.memory_limits = Some(limits);
        self
    }

    pub fn with_call_stack_limits(mut self, limits: CallStackLimits) -> Self {
        self.call_stack_limits = Some(limits);
        self
    }

    pub fn with_network_policy(mut self, policy: NetworkPolicy) -> Self {
        self.network_policy = Some(policy);
        self
    }

    pub fn with_audit(mut self, audit: bool) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    /// Parse an untyped config. An unknown mode, a `capabilities` field that
    /// is not an array of known tags, or a missing mandatory field all fail.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Effective timeout.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    /// Check range constraints and compile the path whitelist.
    pub fn validate(&self) -> Result<PathWhitelist, ConfigError> {
        if let Some(timeout_ms) = self.timeout_ms {
            if timeout_ms > MAX_TIMEOUT_MS {
                return Err(ConfigError::TimeoutOutOfRange {
                    timeout_ms,
                    max_ms: MAX_TIMEOUT_MS,
                });
            }
        }
        PathWhitelist::compile(&self.allowed_paths)
    }
}
