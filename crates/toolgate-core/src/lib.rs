//! toolgate core library
//!
//! Capability-based execution sandbox for agent tool calls: privilege modes,
//! capability inference and checking, path whitelisting, timeout races,
//! resource monitors and an append-only audit trail.

pub mod audit;
pub mod integration;
pub mod metrics;
pub mod monitor;
pub mod obs;
pub mod profile;
pub mod ring;
pub mod sandbox;
pub mod settings;
pub mod telemetry;

pub use audit::{AuditFilter, AuditLogEntry, AuditLogger, AuditOutcome, AuditRecord, AuditStats};
pub use integration::{PolicyDefaults, PolicyIntegration, ToolExecutor, ToolPolicy, ToolResponse};
pub use metrics::{MetricsSnapshot, SandboxMetrics};
pub use monitor::{
    CallStackLimits, CallStackMonitor, MemoryLimits, MemoryTracker, NetworkMonitor,
    NetworkPolicy, ResourceQuota, ResourceQuotaManager,
};
pub use obs::{
    emit_execution_finished, emit_execution_started, emit_policy_denied, emit_violation,
};
pub use profile::{ProfileError, ProfileRegistry, SandboxProfile};
pub use ring::BoundedLog;
pub use sandbox::{
    Capability, CapabilitySet, ErrorKind, ExecutionMetadata, ExecutionResult, SandboxConfig,
    SandboxError, SandboxManager, SandboxMode, Severity, ToolRequest, Violation, ViolationKind,
};
pub use settings::{SandboxSettings, SettingsError, ToolSettings};
pub use telemetry::{init_tracing, NoopTelemetry, RecordingTelemetry, TelemetrySink, TracingTelemetry};

/// toolgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
