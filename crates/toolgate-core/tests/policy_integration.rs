//! Settings-driven tests for the policy integration layer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use toolgate_core::sandbox::error::codes;
use toolgate_core::{
    AuditFilter, ErrorKind, PolicyIntegration, SandboxMode, SandboxSettings, ToolExecutor,
};

const SETTINGS: &str = r#"
default_mode = "controlled"
default_timeout_ms = 10000
default_allowed_paths = ["src/"]

[tools.write_file]
capabilities = ["fs:read", "fs:write"]
timeout_ms = 2000

[tools.read_todo]
profile = "strict"

[tools.edit_notes]
profile = "strict"

[tools.shell_exec]
profile = "trusted"
"#;

fn integration() -> PolicyIntegration {
    let settings = SandboxSettings::from_toml_str(SETTINGS).unwrap();
    PolicyIntegration::from_settings(&settings).unwrap()
}

struct CountingExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl ToolExecutor for CountingExecutor {
    async fn execute(&self, tool_name: &str, args: &Value) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"tool": tool_name, "args": args}))
    }
}

#[tokio::test]
async fn test_registered_tool_respects_default_whitelist() {
    let integration = integration();
    let policy = integration.policy_for("write_file");
    assert_eq!(policy.mode, SandboxMode::Controlled);
    assert_eq!(policy.timeout_ms, 2000);
    assert_eq!(policy.allowed_paths, vec!["src/".to_string()]);

    let ok = integration
        .execute_tool("write_file", json!({"path": "src/main.rs"}), |_| async {
            Ok::<_, String>(json!({"written": 12}))
        })
        .await;
    assert!(ok.success);
    assert_eq!(ok.message, "Tool 'write_file' executed successfully");

    let denied = integration
        .execute_tool("write_file", json!({"path": "/etc/hosts"}), |_| async {
            Ok::<_, String>(Value::Null)
        })
        .await;
    assert!(!denied.success);
    assert_eq!(denied.error.unwrap().code, codes::PATH_NOT_ALLOWED);
}

#[tokio::test]
async fn test_profile_tools_run_under_profile_mode() {
    let integration = integration();

    let read = integration
        .execute_tool("read_todo", json!({}), |_| async {
            Ok::<_, String>(json!({"success": true, "message": "2 open items"}))
        })
        .await;
    assert!(read.success);
    assert_eq!(read.message, "2 open items");
    assert_eq!(read.metadata.unwrap().mode, SandboxMode::Strict);

    let write = integration
        .execute_tool("edit_notes", json!({}), |_| async {
            Ok::<_, String>(Value::Null)
        })
        .await;
    assert!(!write.success);
    assert_eq!(write.error.unwrap().kind, ErrorKind::Capability);
}

#[tokio::test]
async fn test_unregistered_tool_gets_inferred_policy() {
    let integration = integration();
    let res = integration
        .execute_tool("list_files", json!({"path": "src/"}), |args| async move {
            Ok::<_, String>(args)
        })
        .await;
    assert!(res.success);
    assert_eq!(res.data, Some(json!({"path": "src/"})));
}

#[tokio::test]
async fn test_trait_object_executor() {
    let integration = integration();
    let executor = Arc::new(CountingExecutor {
        calls: AtomicUsize::new(0),
    });

    let res = integration
        .execute_tool_with("read_todo", json!({"id": 3}), executor.clone())
        .await;
    assert!(res.success);
    assert_eq!(res.data.unwrap()["tool"], "read_todo");

    let res = integration
        .execute_tool_with("write_file", json!({"path": "/tmp/x"}), executor.clone())
        .await;
    assert!(!res.success);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disabled_sandbox_bypasses_manager() {
    let settings =
        SandboxSettings::from_toml_str(&format!("sandbox_enabled = false\n{SETTINGS}")).unwrap();
    let integration = PolicyIntegration::from_settings(&settings).unwrap();
    assert!(!integration.is_enabled());

    let res = integration
        .execute_tool("write_file", json!({"path": "/etc/hosts"}), |_| async {
            Ok::<_, String>(json!({"success": false, "message": "disk full"}))
        })
        .await;
    assert!(!res.success);
    assert_eq!(res.message, "disk full");
    assert!(res.metadata.is_none());

    let err = integration
        .execute_tool("write_file", json!({}), |_| async { Err::<Value, _>("io error") })
        .await;
    assert_eq!(err.error.unwrap().kind, ErrorKind::Execution);

    assert!(integration.manager().audit().is_empty().await);
    assert_eq!(integration.manager().stats().await.total, 0);
}

#[tokio::test]
async fn test_audit_trail_spans_integration_calls() {
    let integration = integration();
    for path in ["src/a.rs", "/root/.ssh/id_rsa", "src/b.rs"] {
        integration
            .execute_tool("write_file", json!({ "path": path }), |_| async {
                Ok::<_, String>(Value::Null)
            })
            .await;
    }

    let entries = integration
        .manager()
        .audit()
        .logs(&AuditFilter {
            tool: Some("write_file".into()),
            ..AuditFilter::default()
        })
        .await;
    assert_eq!(entries.len(), 3);
    let stats = integration.manager().audit().stats().await;
    assert_eq!(stats.total, 3);
}

#[tokio::test]
async fn test_trusted_profile_writes_no_audit_entries() {
    let integration = integration();
    let res = integration
        .execute_tool("shell_exec", json!({"cmd": "ls"}), |_| async {
            Ok::<_, String>(json!({"stdout": ""}))
        })
        .await;
    assert!(res.success);
    assert_eq!(res.metadata.unwrap().mode, SandboxMode::Trusted);

    integration
        .execute_tool("write_file", json!({"path": "src/a.rs"}), |_| async {
            Ok::<_, String>(Value::Null)
        })
        .await;

    let stats = integration.manager().audit().stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(integration.manager().stats().await.total, 2);
}
