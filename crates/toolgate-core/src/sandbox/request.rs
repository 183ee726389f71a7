//! Tool request type.

use serde::{Deserialize, Serialize};

use super::capability::{infer_capabilities, CapabilitySet};

/// A request to invoke a tool through the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRequest {
    /// Tool name (e.g. "read_file", "run_command").
    pub tool_name: String,
    /// Arguments forwarded to the executor.
    pub args: serde_json::Value,
    /// Declared requirements; inferred from `tool_name` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_capabilities: Option<CapabilitySet>,
}

impl ToolRequest {
    pub fn new(tool_name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
            required_capabilities: None,
        }
    }

    pub fn with_required(mut self, caps: CapabilitySet) -> Self {
        self.required_capabilities = Some(caps);
        self
    }

    /// Declared requirements, or the ones inferred from the tool name.
    pub fn resolve_required(&self) -> CapabilitySet {
        self.required_capabilities
            .clone()
            .unwrap_or_else(|| infer_capabilities(&self.tool_name))
    }
}
