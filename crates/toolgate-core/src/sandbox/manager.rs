//! The sandbox manager: the single gate every tool invocation passes through.
//!
//! One call to [`SandboxManager::execute`] runs a fixed, fail-fast sequence:
//! config validation, capability check, path whitelist, resource pre-flight,
//! the timeout race, post-execution accounting and finally recording into the
//! execution log, audit logger, metrics and telemetry. Executor errors and
//! panics never escape; they come back as `execution` errors inside a failed
//! [`ExecutionResult`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, Span};
use uuid::Uuid;

use crate::audit::{AuditLogger, AuditOutcome, AuditRecord, DEFAULT_AUDIT_CAPACITY};
use crate::metrics::SandboxMetrics;
use crate::monitor::{CallStackMonitor, MemoryTracker, NetworkMonitor, ResourceQuotaManager};
use crate::obs;
use crate::ring::BoundedLog;
use crate::telemetry::{TelemetrySink, TracingTelemetry};

use super::capability::{format_capabilities, CapabilitySet, SandboxMode};
use super::config::SandboxConfig;
use super::engine::check_capabilities;
use super::error::{codes, ConfigError, ErrorKind, SandboxError};
use super::execution::{race_with_timeout, timeout_error, ExecutionMetadata, ExecutionResult, RaceOutcome};
use super::request::ToolRequest;
use super::violation::{max_severity, Severity, Violation, ViolationKind};

/// Argument key inspected by the network pre-flight check.
pub const URL_KEY: &str = "url";

/// Config metadata key copied into audit entries as the acting user.
pub const USER_METADATA_KEY: &str = "user";

/// Capacities and switches for a [`SandboxManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerOptions {
    pub execution_log_capacity: usize,
    pub audit_capacity: usize,
    pub network_log_capacity: usize,
    pub audit_enabled: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            execution_log_capacity: 1_000,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            network_log_capacity: 1_000,
            audit_enabled: true,
        }
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    /// The executor ran and returned an error or panicked.
    Failed,
    /// Rejected before the executor started.
    Blocked,
    TimedOut,
}

/// One entry in the execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub tool: String,
    pub mode: SandboxMode,
    pub outcome: ExecutionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub violation_count: usize,
}

impl ExecutionRecord {
    pub fn success(&self) -> bool {
        self.outcome == ExecutionOutcome::Succeeded
    }
}

/// Aggregates over the retained execution log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub timed_out: usize,
    pub average_duration_ms: f64,
    pub by_tool: BTreeMap<String, usize>,
}

/// An invocation currently inside [`SandboxManager::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveExecution {
    pub execution_id: String,
    pub tool: String,
    pub mode: SandboxMode,
    pub started_at: DateTime<Utc>,
}

type ActiveRegistry = StdMutex<HashMap<Uuid, ActiveExecution>>;

/// Removes an invocation from the active registry when dropped, including
/// when the caller drops the `execute` future midway.
struct ActiveGuard<'a> {
    registry: &'a ActiveRegistry,
    key: Uuid,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

enum Outcome {
    Completed(Value),
    Failed(SandboxError),
    TimedOut(SandboxError),
    Blocked(SandboxError),
}

/// Mutable state of one invocation.
struct Run {
    execution_id: String,
    tool: String,
    mode: SandboxMode,
    user: Option<String>,
    capabilities_used: CapabilitySet,
    violations: Vec<Violation>,
    started: Instant,
    timestamp: DateTime<Utc>,
    frame_pushed: bool,
    concurrent_held: bool,
}

impl Run {
    fn violate(&mut self, kind: ViolationKind, severity: Severity, message: impl Into<String>) {
        let violation = Violation::new(kind, severity, message);
        obs::emit_violation(&self.execution_id, &violation);
        self.violations.push(violation);
    }
}

/// Mediates tool executions against a [`SandboxConfig`].
///
/// All state lives in the instance; construct one per policy domain and share
/// it behind an `Arc`.
pub struct SandboxManager {
    options: ManagerOptions,
    audit: Arc<AuditLogger>,
    network: Arc<NetworkMonitor>,
    call_stack: Arc<CallStackMonitor>,
    quota: Arc<ResourceQuotaManager>,
    telemetry: Arc<dyn TelemetrySink>,
    active: ActiveRegistry,
    log: Mutex<BoundedLog<ExecutionRecord>>,
    metrics: SandboxMetrics,
}

impl std::fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("options", &self.options)
            .field("active", &self.active_execution_count())
            .finish_non_exhaustive()
    }
}

impl Default for SandboxManager {
    fn default() -> Self {
        Self::new(ManagerOptions::default())
    }
}

impl SandboxManager {
    pub fn new(options: ManagerOptions) -> Self {
        let audit = AuditLogger::new(options.audit_capacity);
        audit.set_enabled(options.audit_enabled);
        Self {
            audit: Arc::new(audit),
            network: Arc::new(NetworkMonitor::new(options.network_log_capacity)),
            call_stack: Arc::new(CallStackMonitor::new()),
            quota: Arc::new(ResourceQuotaManager::new()),
            telemetry: Arc::new(TracingTelemetry),
            active: StdMutex::new(HashMap::new()),
            log: Mutex::new(BoundedLog::new(options.execution_log_capacity)),
            metrics: SandboxMetrics::new(),
            options,
        }
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    /// Share an audit logger with other components.
    pub fn with_audit_logger(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Share a network monitor, and with it the per-host rate windows.
    pub fn with_network_monitor(mut self, network: Arc<NetworkMonitor>) -> Self {
        self.network = network;
        self
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn network_monitor(&self) -> &Arc<NetworkMonitor> {
        &self.network
    }

    pub fn call_stack_monitor(&self) -> &Arc<CallStackMonitor> {
        &self.call_stack
    }

    pub fn quota_manager(&self) -> &Arc<ResourceQuotaManager> {
        &self.quota
    }

    pub fn metrics(&self) -> &SandboxMetrics {
        &self.metrics
    }

    /// Run `executor` under `config`.
    ///
    /// The executor is spawned on its own task. On timeout it is detached, not
    /// cancelled, so its side effects may still land after this returns.
    pub async fn execute<F, Fut, E>(
        &self,
        request: ToolRequest,
        config: &SandboxConfig,
        executor: F,
    ) -> ExecutionResult
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        self.run_invocation(request, config, None, executor).await
    }

    /// Like [`execute`](Self::execute) with an untyped config. Parse failures
    /// are reported as `validation` errors and the executor never starts.
    pub async fn execute_value<F, Fut, E>(
        &self,
        request: ToolRequest,
        config: Value,
        executor: F,
    ) -> ExecutionResult
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let mode = declared_mode(&config);
        match SandboxConfig::from_value(config) {
            Ok(cfg) => self.run_invocation(request, &cfg, None, executor).await,
            Err(err) => {
                let placeholder = SandboxConfig::new(mode, CapabilitySet::new());
                self.run_invocation(request, &placeholder, Some(err), executor)
                    .await
            }
        }
    }

    #[instrument(
        name = "sandbox.execute",
        skip_all,
        fields(tool = %request.tool_name, execution_id = tracing::field::Empty)
    )]
    async fn run_invocation<F, Fut, E>(
        &self,
        request: ToolRequest,
        config: &SandboxConfig,
        parse_error: Option<ConfigError>,
        executor: F,
    ) -> ExecutionResult
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let owns_state = config.execution_id.is_none();
        let execution_id = config
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Span::current().record("execution_id", execution_id.as_str());

        let mut run = Run {
            execution_id,
            tool: request.tool_name.clone(),
            mode: config.mode,
            user: config
                .metadata
                .get(USER_METADATA_KEY)
                .and_then(Value::as_str)
                .map(str::to_string),
            capabilities_used: CapabilitySet::new(),
            violations: Vec::new(),
            started: Instant::now(),
            timestamp: Utc::now(),
            frame_pushed: false,
            concurrent_held: false,
        };
        let _active = self.register_active(&run);

        self.metrics.inc_started();
        obs::emit_execution_started(&run.execution_id, &run.tool, &run.mode.to_string());
        self.telemetry.track(
            "sandbox.execution_started",
            json!({ "execution_id": run.execution_id, "tool": run.tool, "mode": run.mode }),
        );

        let outcome = match parse_error {
            Some(err) => Outcome::Blocked(err.into()),
            None => self.run_gated(&mut run, request, config, executor).await,
        };

        self.release(&run).await;
        if owns_state {
            self.clear_execution_state(&run.execution_id).await;
        }
        self.finish(run, config, outcome).await
    }

    async fn run_gated<F, Fut, E>(
        &self,
        run: &mut Run,
        request: ToolRequest,
        config: &SandboxConfig,
        executor: F,
    ) -> Outcome
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let whitelist = match config.validate() {
            Ok(whitelist) => whitelist,
            Err(err) => return Outcome::Blocked(err.into()),
        };

        let required = request.resolve_required();
        run.capabilities_used = required.clone();

        let check = check_capabilities(&required, &config.capabilities, config.mode);
        if let Some(reason) = check.reason() {
            run.violate(ViolationKind::Capability, Severity::Critical, reason.clone());
            return Outcome::Blocked(SandboxError::permission_denied(reason).with_details(json!({
                "required": format_capabilities(&required),
                "missing": format_capabilities(&check.missing),
                "blocked_by_mode": format_capabilities(&check.blocked_by_mode),
            })));
        }

        if config.mode.enforces_path_whitelist() {
            let rejected = whitelist.rejected_paths(&request.args);
            if let Some(first) = rejected.first() {
                let err = SandboxError::path_not_allowed(first)
                    .with_details(json!({ "rejected": rejected.clone() }));
                for path in &rejected {
                    run.violate(
                        ViolationKind::Path,
                        Severity::High,
                        format!("path '{path}' is outside the allowed paths"),
                    );
                }
                return Outcome::Blocked(err);
            }
        }

        if let Some(err) = self.preflight(run, &request.args, config).await {
            return Outcome::Blocked(err);
        }

        let timeout = Duration::from_millis(config.timeout_ms());
        let started = Instant::now();
        let raced = race_with_timeout(timeout, executor, request.args).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Some(quota) = &config.resource_quota {
            self.quota.record_cpu_time(&run.execution_id, elapsed_ms).await;
            for v in self.quota.check(&run.execution_id, quota).await {
                run.violate(ViolationKind::Quota, Severity::Medium, v.to_string());
            }
        }

        match raced {
            RaceOutcome::Completed(data) => {
                if let Some(limits) = &config.memory_limits {
                    for v in MemoryTracker::check_limits(&data, limits) {
                        run.violate(ViolationKind::Memory, Severity::Medium, format!("output {v}"));
                    }
                }
                Outcome::Completed(data)
            }
            RaceOutcome::Failed(message) => Outcome::Failed(SandboxError::execution(message)),
            RaceOutcome::TimedOut => {
                run.violate(
                    ViolationKind::Timeout,
                    Severity::High,
                    format!("execution exceeded {}ms", timeout.as_millis()),
                );
                Outcome::TimedOut(timeout_error(timeout))
            }
        }
    }

    /// Hard resource checks before the executor starts. Returns the blocking
    /// error, if any.
    async fn preflight(
        &self,
        run: &mut Run,
        args: &Value,
        config: &SandboxConfig,
    ) -> Option<SandboxError> {
        if let (Some(policy), Some(url)) = (
            &config.network_policy,
            args.get(URL_KEY).and_then(Value::as_str),
        ) {
            let decision = self.network.is_request_allowed(url, policy).await;
            if let Some(reason) = decision.reason.filter(|_| !decision.allowed) {
                let message = format!("request to '{url}' denied: {reason}");
                run.violate(ViolationKind::Network, Severity::High, message.clone());
                return Some(
                    SandboxError::network_denied(message)
                        .with_details(json!({ "url": url, "reason": reason })),
                );
            }
        }

        if let Some(limits) = &config.memory_limits {
            let overruns = MemoryTracker::check_limits(args, limits);
            if !overruns.is_empty() {
                for v in &overruns {
                    run.violate(ViolationKind::Memory, Severity::Medium, format!("arguments {v}"));
                }
                return Some(
                    SandboxError::resource(
                        codes::MEMORY_LIMIT_EXCEEDED,
                        format!("arguments exceed memory limits: {}", join_display(&overruns)),
                    )
                    .with_details(json!({ "violations": overruns })),
                );
            }
        }

        if let Some(limits) = &config.call_stack_limits {
            self.call_stack.enter(&run.execution_id, &run.tool).await;
            run.frame_pushed = true;
            let overruns = self.call_stack.check_limits(&run.execution_id, limits).await;
            if !overruns.is_empty() {
                for v in &overruns {
                    run.violate(ViolationKind::Depth, Severity::High, v.to_string());
                }
                return Some(
                    SandboxError::resource(
                        codes::CALL_DEPTH_EXCEEDED,
                        format!("call stack limits exceeded: {}", join_display(&overruns)),
                    )
                    .with_details(json!({ "violations": overruns })),
                );
            }
        }

        if let Some(quota) = &config.resource_quota {
            self.quota.record_api_call(&run.execution_id).await;
            self.quota.adjust_concurrent(&run.execution_id, 1).await;
            run.concurrent_held = true;
            let overruns = self.quota.check(&run.execution_id, quota).await;
            if !overruns.is_empty() {
                for v in &overruns {
                    run.violate(ViolationKind::Quota, Severity::Medium, v.to_string());
                }
                return Some(
                    SandboxError::resource(
                        codes::QUOTA_EXCEEDED,
                        format!("resource quota exceeded: {}", join_display(&overruns)),
                    )
                    .with_details(json!({ "violations": overruns })),
                );
            }
        }

        None
    }

    /// Undo the per-invocation bookkeeping taken during pre-flight.
    async fn release(&self, run: &Run) {
        if run.frame_pushed {
            self.call_stack.exit(&run.execution_id).await;
        }
        if run.concurrent_held {
            self.quota.adjust_concurrent(&run.execution_id, -1).await;
        }
    }

    async fn finish(&self, run: Run, config: &SandboxConfig, outcome: Outcome) -> ExecutionResult {
        let duration_ms = run.started.elapsed().as_millis() as u64;
        let metadata = ExecutionMetadata {
            execution_id: run.execution_id.clone(),
            tool: run.tool.clone(),
            duration_ms,
            timestamp: run.timestamp,
            mode: run.mode,
            capabilities_used: run.capabilities_used,
            violations: run.violations,
            max_memory: config.max_memory,
            max_call_depth: config.max_call_depth,
        };

        let (result, kind) = match outcome {
            Outcome::Completed(data) => (
                ExecutionResult::succeeded(data, metadata),
                ExecutionOutcome::Succeeded,
            ),
            Outcome::Failed(err) => (ExecutionResult::failed(err, metadata), ExecutionOutcome::Failed),
            Outcome::TimedOut(err) => (
                ExecutionResult::failed(err, metadata),
                ExecutionOutcome::TimedOut,
            ),
            Outcome::Blocked(err) => (
                ExecutionResult::failed(err, metadata),
                ExecutionOutcome::Blocked,
            ),
        };

        match kind {
            ExecutionOutcome::Succeeded => self.metrics.inc_succeeded(),
            ExecutionOutcome::Failed => self.metrics.inc_failed(),
            ExecutionOutcome::TimedOut => {
                self.metrics.inc_timed_out();
                self.metrics.inc_failed();
            }
            ExecutionOutcome::Blocked => self.metrics.inc_blocked(),
        }
        let violations = &result.metadata.violations;
        self.metrics.add_violations(violations.len() as u64);

        if let (ExecutionOutcome::Blocked, Some(err)) = (kind, &result.error) {
            obs::emit_policy_denied(&run.execution_id, &run.tool, &err.code, &err.message);
        }

        let record = ExecutionRecord {
            execution_id: run.execution_id.clone(),
            tool: run.tool.clone(),
            mode: run.mode,
            outcome: kind,
            error_kind: result.error.as_ref().map(|e| e.kind),
            error_code: result.error.as_ref().map(|e| e.code.clone()),
            duration_ms,
            timestamp: run.timestamp,
            violation_count: violations.len(),
        };
        if let Some(evicted) = self.log.lock().await.push(record) {
            debug!(execution_id = %evicted.execution_id, "execution log rolled over");
        }

        let severity = max_severity(violations).unwrap_or(match kind {
            ExecutionOutcome::Succeeded => Severity::Low,
            _ => Severity::Medium,
        });
        let audit_outcome = match kind {
            ExecutionOutcome::Succeeded => AuditOutcome::Success,
            ExecutionOutcome::Failed | ExecutionOutcome::TimedOut => AuditOutcome::Failure,
            ExecutionOutcome::Blocked => AuditOutcome::Blocked,
        };
        let mut audit = AuditRecord::new(&run.tool, "execute", audit_outcome, severity)
            .with_metadata(json!({
                "execution_id": run.execution_id,
                "mode": run.mode,
                "duration_ms": duration_ms,
                "violations": violations.len(),
                "error_code": result.error.as_ref().map(|e| e.code.as_str()),
            }));
        if let Some(err) = &result.error {
            audit = audit.with_reason(err.message.clone());
        }
        if let Some(user) = run.user {
            audit = audit.with_user(user);
        }
        if config.audit {
            self.audit.log(audit).await;
        }

        self.telemetry.track(
            "sandbox.execution_finished",
            json!({
                "execution_id": run.execution_id,
                "tool": run.tool,
                "outcome": kind,
                "duration_ms": duration_ms,
                "violations": violations.len(),
            }),
        );
        obs::emit_execution_finished(
            &run.execution_id,
            &run.tool,
            duration_ms,
            result.success,
            violations.len(),
        );

        result
    }

    fn register_active(&self, run: &Run) -> ActiveGuard<'_> {
        let key = Uuid::new_v4();
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                ActiveExecution {
                    execution_id: run.execution_id.clone(),
                    tool: run.tool.clone(),
                    mode: run.mode,
                    started_at: run.timestamp,
                },
            );
        ActiveGuard {
            registry: &self.active,
            key,
        }
    }

    pub fn active_execution_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// In-flight invocations, oldest first.
    pub fn active_executions(&self) -> Vec<ActiveExecution> {
        let mut active: Vec<ActiveExecution> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    /// Forget every tracked invocation. Running executors are not touched.
    pub fn cancel_all_executions(&self) -> usize {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let cleared = active.len();
        active.clear();
        cleared
    }

    /// The most recent `limit` execution records, oldest first.
    pub async fn recent_executions(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.log.lock().await.recent(limit).cloned().collect()
    }

    pub async fn stats(&self) -> ExecutionStats {
        let log = self.log.lock().await;
        let mut stats = ExecutionStats {
            total: log.len(),
            ..ExecutionStats::default()
        };
        let mut total_ms: u64 = 0;
        for record in log.iter() {
            match record.outcome {
                ExecutionOutcome::Succeeded => stats.succeeded += 1,
                ExecutionOutcome::Failed => stats.failed += 1,
                ExecutionOutcome::Blocked => stats.blocked += 1,
                ExecutionOutcome::TimedOut => stats.timed_out += 1,
            }
            total_ms += record.duration_ms;
            *stats.by_tool.entry(record.tool.clone()).or_insert(0) += 1;
        }
        if stats.total > 0 {
            stats.average_duration_ms = total_ms as f64 / stats.total as f64;
        }
        stats
    }

    pub async fn clear_execution_log(&self) {
        self.log.lock().await.clear();
    }

    /// Drop quota and call-stack state for a caller-owned execution id.
    pub async fn clear_execution_state(&self, execution_id: &str) {
        self.quota.clear(execution_id).await;
        self.call_stack.clear(execution_id).await;
    }
}

/// Mode named by an untyped config, falling back to the most restrictive.
fn declared_mode(config: &Value) -> SandboxMode {
    config
        .get("mode")
        .and_then(Value::as_str)
        .and_then(|m| m.parse().ok())
        .unwrap_or(SandboxMode::Strict)
}

fn join_display<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
