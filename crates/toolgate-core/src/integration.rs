//! Policy integration: per-tool defaults in front of the sandbox manager.
//!
//! Callers hand a tool name, arguments and an executor to
//! [`PolicyIntegration::execute_tool`]. The layer resolves the tool's policy
//! (registered, or derived from defaults and capability inference), builds a
//! [`SandboxConfig`], runs the manager and reshapes the result into a
//! [`ToolResponse`]. With the sandbox switched off, executors are called
//! directly.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::profile::{ProfileError, ProfileRegistry};
use crate::sandbox::capability::{infer_capabilities, CapabilitySet, SandboxMode};
use crate::sandbox::config::{SandboxConfig, DEFAULT_TIMEOUT_MS};
use crate::sandbox::error::SandboxError;
use crate::sandbox::execution::{ExecutionMetadata, ExecutionResult};
use crate::sandbox::manager::SandboxManager;
use crate::sandbox::request::ToolRequest;
use crate::settings::{SandboxSettings, SettingsError, ToolSettings};

/// Trait-object form of a tool executor.
#[async_trait]
pub trait ToolExecutor: Send + Sync + 'static {
    async fn execute(&self, tool_name: &str, args: &Value) -> Result<Value, String>;
}

/// Resolved sandbox policy for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPolicy {
    pub mode: SandboxMode,
    /// Granted capabilities.
    pub capabilities: CapabilitySet,
    /// Requirements, fixed when the policy is built.
    pub required_capabilities: CapabilitySet,
    pub timeout_ms: u64,
    pub allowed_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// Fallbacks for tools without a registered policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDefaults {
    pub mode: SandboxMode,
    pub timeout_ms: u64,
    pub allowed_paths: Vec<String>,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            mode: SandboxMode::Controlled,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            allowed_paths: Vec::new(),
        }
    }
}

/// The caller-facing envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SandboxError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExecutionMetadata>,
}

impl ToolResponse {
    /// Reshape a manager result. An executor's own `{success, message}`
    /// envelope is preserved.
    pub fn from_result(tool: &str, result: ExecutionResult) -> Self {
        if result.success {
            let data = result.data.unwrap_or(Value::Null);
            let (success, message) = envelope(tool, &data);
            Self {
                success,
                message,
                data: Some(data),
                error: None,
                metadata: Some(result.metadata),
            }
        } else {
            Self {
                success: false,
                message: result
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| format!("Tool '{tool}' failed")),
                data: None,
                error: result.error,
                metadata: Some(result.metadata),
            }
        }
    }

    fn rejected(tool: &str, error: SandboxError) -> Self {
        Self {
            success: false,
            message: format!("Tool '{tool}' rejected: {}", error.message),
            data: None,
            error: Some(error),
            metadata: None,
        }
    }
}

fn envelope(tool: &str, data: &Value) -> (bool, String) {
    let own_success = data.get("success").and_then(Value::as_bool);
    let own_message = data.get("message").and_then(Value::as_str);
    match (own_success, own_message) {
        (Some(success), Some(message)) => (success, message.to_string()),
        (Some(success), None) => (success, format!("Tool '{tool}' executed")),
        _ => (true, format!("Tool '{tool}' executed successfully")),
    }
}

pub struct PolicyIntegration {
    manager: Arc<SandboxManager>,
    profiles: ProfileRegistry,
    policies: BTreeMap<String, ToolPolicy>,
    defaults: PolicyDefaults,
    enabled: AtomicBool,
}

impl PolicyIntegration {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self {
            manager,
            profiles: ProfileRegistry::with_defaults(),
            policies: BTreeMap::new(),
            defaults: PolicyDefaults::default(),
            enabled: AtomicBool::new(true),
        }
    }

    /// Build the manager, profiles and tool table from settings.
    pub fn from_settings(settings: &SandboxSettings) -> Result<Self, SettingsError> {
        let manager = Arc::new(SandboxManager::new(settings.manager_options()));
        let mut integration = Self::new(manager)
            .with_profiles(settings.profile_registry()?)
            .with_defaults(PolicyDefaults {
                mode: settings.default_mode,
                timeout_ms: settings.default_timeout_ms,
                allowed_paths: settings.default_allowed_paths.clone(),
            });
        for (name, tool) in &settings.tools {
            integration.register_tool(name, tool)?;
        }
        integration.set_enabled(settings.sandbox_enabled);
        Ok(integration)
    }

    pub fn with_profiles(mut self, profiles: ProfileRegistry) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_defaults(mut self, defaults: PolicyDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn manager(&self) -> &Arc<SandboxManager> {
        &self.manager
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut ProfileRegistry {
        &mut self.profiles
    }

    pub fn defaults(&self) -> &PolicyDefaults {
        &self.defaults
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Resolve `settings` into a policy and register it. Unset fields come
    /// from the named profile, then from the defaults; required capabilities
    /// are inferred from the name when not declared.
    pub fn register_tool(
        &mut self,
        name: &str,
        settings: &ToolSettings,
    ) -> Result<&ToolPolicy, ProfileError> {
        let profile_config = match &settings.profile {
            Some(profile) => Some(self.profiles.get(profile)?.config.clone()),
            None => None,
        };
        let inferred = infer_capabilities(name);

        let policy = ToolPolicy {
            mode: settings
                .mode
                .or(profile_config.as_ref().map(|c| c.mode))
                .unwrap_or(self.defaults.mode),
            capabilities: settings
                .capabilities
                .clone()
                .or_else(|| profile_config.as_ref().map(|c| c.capabilities.clone()))
                .unwrap_or_else(|| inferred.clone()),
            required_capabilities: settings.required_capabilities.clone().unwrap_or(inferred),
            timeout_ms: settings
                .timeout_ms
                .or(profile_config.as_ref().and_then(|c| c.timeout_ms))
                .unwrap_or(self.defaults.timeout_ms),
            allowed_paths: settings
                .allowed_paths
                .clone()
                .or_else(|| {
                    profile_config
                        .as_ref()
                        .map(|c| c.allowed_paths.clone())
                        .filter(|p| !p.is_empty())
                })
                .unwrap_or_else(|| self.defaults.allowed_paths.clone()),
            profile: settings.profile.clone(),
        };
        Ok(self.register_policy(name, policy))
    }

    /// Register an already-resolved policy.
    pub fn register_policy(&mut self, name: &str, policy: ToolPolicy) -> &ToolPolicy {
        debug!(tool = %name, mode = %policy.mode, "tool policy registered");
        self.policies.insert(name.to_string(), policy);
        &self.policies[name]
    }

    pub fn unregister_tool(&mut self, name: &str) -> Option<ToolPolicy> {
        self.policies.remove(name)
    }

    pub fn registered_tools(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Registered policy, or one derived from the defaults.
    pub fn policy_for(&self, tool: &str) -> ToolPolicy {
        if let Some(policy) = self.policies.get(tool) {
            return policy.clone();
        }
        let inferred = infer_capabilities(tool);
        ToolPolicy {
            mode: self.defaults.mode,
            capabilities: inferred.clone(),
            required_capabilities: inferred,
            timeout_ms: self.defaults.timeout_ms,
            allowed_paths: self.defaults.allowed_paths.clone(),
            profile: None,
        }
    }

    /// The sandbox config a call to `tool` would run under.
    pub fn config_for(&self, tool: &str) -> Result<SandboxConfig, ProfileError> {
        let policy = self.policy_for(tool);
        let mut config = match &policy.profile {
            Some(name) => self.profiles.get(name)?.to_config(),
            None => SandboxConfig::new(policy.mode, CapabilitySet::new()),
        };
        config.mode = policy.mode;
        config.capabilities = policy.capabilities;
        config.timeout_ms = Some(policy.timeout_ms);
        config.allowed_paths = policy.allowed_paths;
        Ok(config)
    }

    pub async fn execute_tool<F, Fut, E>(&self, tool: &str, args: Value, executor: F) -> ToolResponse
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        if !self.is_enabled() {
            debug!(tool = %tool, "sandbox disabled; calling executor directly");
            return match executor(args).await {
                Ok(data) => {
                    let (success, message) = envelope(tool, &data);
                    ToolResponse {
                        success,
                        message,
                        data: Some(data),
                        error: None,
                        metadata: None,
                    }
                }
                Err(err) => {
                    let error = SandboxError::execution(err.to_string());
                    ToolResponse {
                        success: false,
                        message: error.message.clone(),
                        data: None,
                        error: Some(error),
                        metadata: None,
                    }
                }
            };
        }

        let policy = self.policy_for(tool);
        let config = match self.config_for(tool) {
            Ok(config) => config,
            Err(err) => {
                warn!(tool = %tool, error = %err, "tool policy could not be resolved");
                return ToolResponse::rejected(tool, SandboxError::invalid_config(err.to_string()));
            }
        };
        let request = ToolRequest::new(tool, args).with_required(policy.required_capabilities);
        let result = self.manager.execute(request, &config, executor).await;
        ToolResponse::from_result(tool, result)
    }

    pub async fn execute_tool_with(
        &self,
        tool: &str,
        args: Value,
        executor: Arc<dyn ToolExecutor>,
    ) -> ToolResponse {
        let name = tool.to_string();
        self.execute_tool(tool, args, move |args| async move {
            executor.execute(&name, &args).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capability::Capability;
    use serde_json::json;

    fn integration() -> PolicyIntegration {
        PolicyIntegration::new(Arc::new(SandboxManager::default()))
    }

    #[test]
    fn test_policy_for_unregistered_tool_uses_inference() {
        let policy = integration().policy_for("write_file");
        assert_eq!(policy.mode, SandboxMode::Controlled);
        assert!(policy.capabilities.contains(&Capability::FsWrite));
        assert_eq!(policy.capabilities, policy.required_capabilities);
        assert_eq!(policy.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_register_resolves_requirements_once() {
        let mut layer = integration();
        let policy = layer
            .register_tool(
                "delete_file",
                &ToolSettings {
                    capabilities: Some([Capability::FsRead].into_iter().collect()),
                    ..ToolSettings::default()
                },
            )
            .unwrap();
        assert!(policy.required_capabilities.contains(&Capability::FsDelete));
        assert!(!policy.capabilities.contains(&Capability::FsDelete));
    }

    #[test]
    fn test_register_with_profile_inherits_profile_fields() {
        let mut layer = integration();
        layer
            .register_tool(
                "read_file",
                &ToolSettings {
                    profile: Some("strict".into()),
                    ..ToolSettings::default()
                },
            )
            .unwrap();
        let config = layer.config_for("read_file").unwrap();
        assert_eq!(config.mode, SandboxMode::Strict);
        assert_eq!(config.timeout_ms(), 10_000);
        assert_eq!(config.resource_quota.unwrap().max_api_calls, 100);
    }

    #[test]
    fn test_register_with_unknown_profile_fails() {
        let mut layer = integration();
        let err = layer
            .register_tool(
                "read_file",
                &ToolSettings {
                    profile: Some("nope".into()),
                    ..ToolSettings::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ProfileError::NotFound(_)));
    }

    #[test]
    fn test_envelope_preserved() {
        let (ok, msg) = envelope("t", &json!({"success": false, "message": "nothing to do"}));
        assert!(!ok);
        assert_eq!(msg, "nothing to do");
        let (ok, msg) = envelope("t", &json!([1, 2]));
        assert!(ok);
        assert!(msg.contains("'t'"));
    }

    #[tokio::test]
    async fn test_disabled_bypasses_manager() {
        let layer = integration();
        layer.set_enabled(false);
        let resp = layer
            .execute_tool("run_command", json!({"cmd": "ls"}), |args| async move {
                Ok::<_, String>(args)
            })
            .await;
        assert!(resp.success);
        assert!(resp.metadata.is_none());
        assert_eq!(layer.manager().stats().await.total, 0);
    }
}
