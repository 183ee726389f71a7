//! TOML settings: manager capacities, defaults, per-tool policies and
//! profile overrides.
//!
//! ```toml
//! default_mode = "controlled"
//! default_timeout_ms = 30000
//! default_allowed_paths = ["src/"]
//!
//! [tools.write_file]
//! capabilities = ["fs:read", "fs:write"]
//! timeout_ms = 5000
//!
//! [profiles.strict]
//! timeout_ms = 2000
//! quota = { max_cpu_time_ms = 1000, max_disk_bytes = 0, max_api_calls = 10, max_concurrent_ops = 1 }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audit::DEFAULT_AUDIT_CAPACITY;
use crate::monitor::{CallStackLimits, MemoryLimits, NetworkPolicy, ResourceQuota};
use crate::profile::{ProfileError, ProfileRegistry, SandboxProfile};
use crate::sandbox::capability::{CapabilitySet, SandboxMode};
use crate::sandbox::config::{DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS};
use crate::sandbox::manager::ManagerOptions;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Per-tool overrides. Unset fields fall back to the global defaults or to
/// capability inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSettings {
    pub mode: Option<SandboxMode>,
    /// Granted capabilities.
    pub capabilities: Option<CapabilitySet>,
    /// Declared requirements; inferred from the tool name when unset.
    pub required_capabilities: Option<CapabilitySet>,
    pub timeout_ms: Option<u64>,
    pub allowed_paths: Option<Vec<String>>,
    pub profile: Option<String>,
}

/// Partial profile; applied on top of the existing profile with the same
/// name, or on top of `controlled` for a new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileOverride {
    pub description: Option<String>,
    pub mode: Option<SandboxMode>,
    pub capabilities: Option<CapabilitySet>,
    pub timeout_ms: Option<u64>,
    pub allowed_paths: Option<Vec<String>>,
    pub network: Option<NetworkPolicy>,
    pub memory: Option<MemoryLimits>,
    pub quota: Option<ResourceQuota>,
    pub call_stack: Option<CallStackLimits>,
    pub audit_enabled: Option<bool>,
}

impl ProfileOverride {
    fn apply(&self, mut profile: SandboxProfile) -> SandboxProfile {
        if let Some(description) = &self.description {
            profile.description = description.clone();
        }
        if let Some(mode) = self.mode {
            profile.config.mode = mode;
        }
        if let Some(caps) = &self.capabilities {
            profile.config.capabilities = caps.clone();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            profile.config.timeout_ms = Some(timeout_ms);
        }
        if let Some(paths) = &self.allowed_paths {
            profile.config.allowed_paths = paths.clone();
        }
        if let Some(network) = &self.network {
            profile.network = network.clone();
        }
        if let Some(memory) = &self.memory {
            profile.memory = memory.clone();
        }
        if let Some(quota) = &self.quota {
            profile.quota = quota.clone();
        }
        if let Some(call_stack) = &self.call_stack {
            profile.call_stack = call_stack.clone();
        }
        if let Some(audit_enabled) = self.audit_enabled {
            profile.audit_enabled = audit_enabled;
        }
        profile
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSettings {
    pub default_mode: SandboxMode,
    pub default_timeout_ms: u64,
    pub default_allowed_paths: Vec<String>,
    pub execution_log_capacity: usize,
    pub audit_capacity: usize,
    pub network_log_capacity: usize,
    pub audit_enabled: bool,
    /// When false, the integration layer calls executors directly.
    pub sandbox_enabled: bool,
    pub tools: BTreeMap<String, ToolSettings>,
    pub profiles: BTreeMap<String, ProfileOverride>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        let options = ManagerOptions::default();
        Self {
            default_mode: SandboxMode::Controlled,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            default_allowed_paths: Vec::new(),
            execution_log_capacity: options.execution_log_capacity,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            network_log_capacity: options.network_log_capacity,
            audit_enabled: true,
            sandbox_enabled: true,
            tools: BTreeMap::new(),
            profiles: BTreeMap::new(),
        }
    }
}

impl SandboxSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.default_timeout_ms > MAX_TIMEOUT_MS {
            return Err(SettingsError::Invalid(format!(
                "default_timeout_ms {} exceeds {MAX_TIMEOUT_MS}",
                self.default_timeout_ms
            )));
        }
        for (name, tool) in &self.tools {
            if tool.timeout_ms.is_some_and(|t| t > MAX_TIMEOUT_MS) {
                return Err(SettingsError::Invalid(format!(
                    "tools.{name}.timeout_ms exceeds {MAX_TIMEOUT_MS}"
                )));
            }
        }
        Ok(())
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            execution_log_capacity: self.execution_log_capacity,
            audit_capacity: self.audit_capacity,
            network_log_capacity: self.network_log_capacity,
            audit_enabled: self.audit_enabled,
        }
    }

    /// Default profiles with this file's overrides applied.
    pub fn profile_registry(&self) -> Result<ProfileRegistry, SettingsError> {
        let mut registry = ProfileRegistry::with_defaults();
        for (name, patch) in &self.profiles {
            let base = match registry.get(name) {
                Ok(existing) => existing.clone(),
                Err(_) => SandboxProfile {
                    name: name.clone(),
                    ..SandboxProfile::controlled()
                },
            };
            registry.add(patch.apply(base))?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capability::Capability;
    use std::io::Write;

    const SAMPLE: &str = r#"
default_mode = "strict"
default_timeout_ms = 5000
default_allowed_paths = ["src/", "docs/*.md"]
audit_capacity = 50

[tools.write_file]
mode = "controlled"
capabilities = ["fs:read", "fs:write"]
timeout_ms = 2000

[profiles.strict]
timeout_ms = 2000

[profiles.ci]
description = "CI runners"
mode = "trusted"
audit_enabled = false
"#;

    #[test]
    fn test_defaults_when_empty() {
        let settings = SandboxSettings::from_toml_str("").unwrap();
        assert_eq!(settings, SandboxSettings::default());
        assert_eq!(settings.default_timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(settings.sandbox_enabled);
    }

    #[test]
    fn test_parse_sample() {
        let settings = SandboxSettings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.default_mode, SandboxMode::Strict);
        assert_eq!(settings.manager_options().audit_capacity, 50);

        let tool = &settings.tools["write_file"];
        assert_eq!(tool.mode, Some(SandboxMode::Controlled));
        assert!(tool
            .capabilities
            .as_ref()
            .unwrap()
            .contains(&Capability::FsWrite));
    }

    #[test]
    fn test_profile_overrides() {
        let settings = SandboxSettings::from_toml_str(SAMPLE).unwrap();
        let registry = settings.profile_registry().unwrap();

        let strict = registry.get("strict").unwrap();
        assert_eq!(strict.config.timeout_ms(), 2000);
        assert_eq!(strict.config.mode, SandboxMode::Strict);

        let ci = registry.get("ci").unwrap();
        assert_eq!(ci.config.mode, SandboxMode::Trusted);
        assert!(!ci.audit_enabled);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_values() {
        assert!(matches!(
            SandboxSettings::from_toml_str("defualt_mode = \"strict\""),
            Err(SettingsError::Parse(_))
        ));
        assert!(matches!(
            SandboxSettings::from_toml_str("default_mode = \"root\""),
            Err(SettingsError::Parse(_))
        ));
        assert!(matches!(
            SandboxSettings::from_toml_str("default_timeout_ms = 999999"),
            Err(SettingsError::Invalid(_))
        ));
    }

    #[test]
    fn test_invalid_profile_override() {
        let settings =
            SandboxSettings::from_toml_str("[profiles.strict]\ntimeout_ms = 900000").unwrap();
        assert!(matches!(
            settings.profile_registry(),
            Err(SettingsError::Profile(ProfileError::Invalid { .. }))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let settings = SandboxSettings::load(file.path()).unwrap();
        assert_eq!(settings.default_allowed_paths.len(), 2);

        let missing = SandboxSettings::load("/nonexistent/toolgate.toml");
        assert!(matches!(missing, Err(SettingsError::Io { .. })));
    }
}
