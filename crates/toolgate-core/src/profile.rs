//! Named sandbox profiles: complete, reusable policies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::monitor::{CallStackLimits, MemoryLimits, NetworkPolicy, ResourceQuota};
use crate::sandbox::capability::{Capability, CapabilitySet, SandboxMode};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::error::ConfigError;

const MB: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("unknown sandbox profile '{0}'")]
    NotFound(String),

    #[error("profile '{name}' is invalid: {source}")]
    Invalid {
        name: String,
        #[source]
        source: ConfigError,
    },
}

/// A named bundle of mode, capabilities and every monitor limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub config: SandboxConfig,
    #[serde(default)]
    pub network: NetworkPolicy,
    #[serde(default)]
    pub memory: MemoryLimits,
    #[serde(default)]
    pub quota: ResourceQuota,
    #[serde(default)]
    pub call_stack: CallStackLimits,
    #[serde(default = "default_audit_enabled")]
    pub audit_enabled: bool,
}

fn default_audit_enabled() -> bool {
    true
}

impl SandboxProfile {
    /// A live config carrying this profile's limits.
    pub fn to_config(&self) -> SandboxConfig {
        let mut config = self.config.clone();
        config.network_policy = Some(self.network.clone());
        config.memory_limits = Some(self.memory.clone());
        config.resource_quota = Some(self.quota.clone());
        config.call_stack_limits = Some(self.call_stack.clone());
        config.audit = self.audit_enabled;
        config
    }

    /// Read-only access to files, state and memory. No writes, no network.
    pub fn strict() -> Self {
        use Capability::*;
        Self {
            name: "strict".into(),
            description: "Read-only access; every write-type capability is refused".into(),
            config: SandboxConfig::new(SandboxMode::Strict, caps(&[FsRead, StateRead, MemoryRead]))
                .with_timeout_ms(10_000),
            network: NetworkPolicy {
                max_requests_per_minute: 10,
                max_response_bytes: MB,
                ..NetworkPolicy::default()
            },
            memory: MemoryLimits {
                max_heap_bytes: 50 * MB,
                max_array_length: 10_000,
                max_string_length: MB as usize,
                max_object_depth: 16,
            },
            quota: ResourceQuota {
                max_cpu_time_ms: 5_000,
                max_disk_bytes: 10 * MB,
                max_api_calls: 100,
                max_concurrent_ops: 2,
            },
            call_stack: CallStackLimits {
                max_depth: 50,
                max_recursion: 10,
            },
            audit_enabled: true,
        }
    }

    /// Day-to-day development: file and state writes within the whitelist.
    pub fn controlled() -> Self {
        use Capability::*;
        Self {
            name: "controlled".into(),
            description: "Granted capabilities enforced as-is; path whitelist applies".into(),
            config: SandboxConfig::new(
                SandboxMode::Controlled,
                caps(&[
                    FsRead,
                    FsWrite,
                    StateRead,
                    StateWrite,
                    MemoryRead,
                    MemoryWrite,
                    NetworkRead,
                ]),
            )
            .with_timeout_ms(30_000),
            network: NetworkPolicy {
                max_requests_per_minute: 60,
                max_response_bytes: 10 * MB,
                ..NetworkPolicy::default()
            },
            memory: MemoryLimits {
                max_heap_bytes: 200 * MB,
                ..MemoryLimits::default()
            },
            quota: ResourceQuota {
                max_cpu_time_ms: 60_000,
                max_disk_bytes: 100 * MB,
                max_api_calls: 1_000,
                max_concurrent_ops: 5,
            },
            call_stack: CallStackLimits {
                max_depth: 100,
                max_recursion: 50,
            },
            audit_enabled: true,
        }
    }

    /// Every capability, generous limits, no audit entries.
    pub fn trusted() -> Self {
        Self {
            name: "trusted".into(),
            description: "All capabilities; no path whitelist".into(),
            config: SandboxConfig::new(SandboxMode::Trusted, Capability::ALL.into_iter().collect())
                .with_timeout_ms(300_000),
            network: NetworkPolicy {
                max_requests_per_minute: 600,
                max_response_bytes: 100 * MB,
                ..NetworkPolicy::default()
            },
            memory: MemoryLimits {
                max_heap_bytes: 500 * MB,
                max_array_length: 1_000_000,
                max_string_length: (100 * MB) as usize,
                max_object_depth: 64,
            },
            quota: ResourceQuota {
                max_cpu_time_ms: 300_000,
                max_disk_bytes: 1024 * MB,
                max_api_calls: 10_000,
                max_concurrent_ops: 20,
            },
            call_stack: CallStackLimits {
                max_depth: 500,
                max_recursion: 200,
            },
            audit_enabled: false,
        }
    }
}

fn caps(list: &[Capability]) -> CapabilitySet {
    list.iter().copied().collect()
}

/// Mutable, name-keyed set of profiles.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, SandboxProfile>,
}

impl ProfileRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry seeded with `strict`, `controlled` and `trusted`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for profile in [
            SandboxProfile::strict(),
            SandboxProfile::controlled(),
            SandboxProfile::trusted(),
        ] {
            registry.profiles.insert(profile.name.clone(), profile);
        }
        registry
    }

    /// Insert or replace a profile. Returns the replaced one.
    pub fn add(&mut self, profile: SandboxProfile) -> Result<Option<SandboxProfile>, ProfileError> {
        profile
            .to_config()
            .validate()
            .map_err(|source| ProfileError::Invalid {
                name: profile.name.clone(),
                source,
            })?;
        Ok(self.profiles.insert(profile.name.clone(), profile))
    }

    pub fn get(&self, name: &str) -> Result<&SandboxProfile, ProfileError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    /// Profiles ordered by name.
    pub fn list(&self) -> impl Iterator<Item = &SandboxProfile> {
        self.profiles.values()
    }

    pub fn remove(&mut self, name: &str) -> Result<SandboxProfile, ProfileError> {
        self.profiles
            .remove(name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_seeded() {
        let registry = ProfileRegistry::with_defaults();
        let names: Vec<&str> = registry.list().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["controlled", "strict", "trusted"]);
    }

    #[test]
    fn test_default_limits_table() {
        let registry = ProfileRegistry::with_defaults();

        let strict = registry.get("strict").unwrap();
        assert_eq!(strict.config.mode, SandboxMode::Strict);
        assert_eq!(strict.config.timeout_ms(), 10_000);
        assert_eq!(strict.memory.max_heap_bytes, 50 * MB);
        assert_eq!(strict.quota.max_concurrent_ops, 2);
        assert_eq!(strict.call_stack.max_recursion, 10);
        assert_eq!(strict.network.max_requests_per_minute, 10);

        let controlled = registry.get("controlled").unwrap();
        assert_eq!(controlled.quota.max_api_calls, 1_000);
        assert_eq!(controlled.call_stack.max_depth, 100);

        let trusted = registry.get("trusted").unwrap();
        assert_eq!(trusted.config.timeout_ms(), 300_000);
        assert_eq!(trusted.quota.max_disk_bytes, 1024 * MB);
        assert_eq!(trusted.network.max_requests_per_minute, 600);
        assert!(!trusted.audit_enabled);
        assert_eq!(trusted.config.capabilities.len(), Capability::ALL.len());
    }

    #[test]
    fn test_profile_audit_switch_reaches_config() {
        assert!(!SandboxProfile::trusted().to_config().audit);
        assert!(SandboxProfile::strict().to_config().audit);
        assert!(SandboxProfile::controlled().to_config().audit);
    }

    #[test]
    fn test_strict_grants_no_write_capabilities() {
        let strict = SandboxProfile::strict();
        assert!(strict.config.capabilities.iter().all(|c| !c.is_write()));
    }

    #[test]
    fn test_to_config_carries_limits() {
        let cfg = SandboxProfile::controlled().to_config();
        assert_eq!(cfg.mode, SandboxMode::Controlled);
        assert_eq!(cfg.resource_quota.unwrap().max_cpu_time_ms, 60_000);
        assert_eq!(cfg.call_stack_limits.unwrap().max_depth, 100);
        assert!(cfg.network_policy.is_some());
        assert!(cfg.memory_limits.is_some());
    }

    #[test]
    fn test_override_and_remove() {
        let mut registry = ProfileRegistry::with_defaults();
        let mut custom = SandboxProfile::strict();
        custom.description = "tightened".into();
        custom.quota.max_api_calls = 5;
        let replaced = registry.add(custom).unwrap();
        assert!(replaced.is_some());
        assert_eq!(registry.get("strict").unwrap().quota.max_api_calls, 5);

        registry.remove("strict").unwrap();
        assert!(matches!(
            registry.get("strict"),
            Err(ProfileError::NotFound(name)) if name == "strict"
        ));
        assert!(registry.remove("strict").is_err());
    }

    #[test]
    fn test_add_rejects_invalid_config() {
        let mut registry = ProfileRegistry::new();
        let mut bad = SandboxProfile::trusted();
        bad.name = "slow".into();
        bad.config.timeout_ms = Some(10_000_000);
        assert!(matches!(
            registry.add(bad),
            Err(ProfileError::Invalid { .. })
        ));
        assert!(registry.is_empty());
    }
}
