//! Sandbox: capability-gated tool execution for autonomous agents.
//!
//! Every tool call passes through [`SandboxManager::execute`], which checks
//! the requested capabilities against the grant and privilege mode, validates
//! path arguments, runs resource pre-flight checks and races the executor
//! against a timeout. Executors are cooperative in-process callables; this is
//! a policy gate, not an OS-level jail.
//!
//! # Modules
//!
//! - [`capability`]: `Capability`, `SandboxMode`, tool-name classification
//! - [`engine`]    : `check_capabilities()`, pure
//! - [`policy`]    : `PathWhitelist`, path extraction and normalisation
//! - [`config`]    : `SandboxConfig`
//! - [`request`]   : `ToolRequest`
//! - [`execution`] : `ExecutionResult`, `race_with_timeout()`
//! - [`violation`] : `Violation`, `Severity`
//! - [`manager`]   : `SandboxManager`
//! - [`error`]     : `SandboxError` / `ErrorKind` / `ConfigError`

pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod manager;
pub mod policy;
pub mod request;
pub mod violation;

pub use capability::{
    infer_capabilities, parse_capability_list, Capability, CapabilitySet, SandboxMode, ToolClass,
    ToolResource, ToolVerb,
};
pub use config::{SandboxConfig, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS};
pub use engine::{check_capabilities, CapabilityCheck};
pub use error::{ConfigError, ErrorKind, SandboxError};
pub use execution::{race_with_timeout, ExecutionMetadata, ExecutionResult, RaceOutcome};
pub use manager::{
    ActiveExecution, ExecutionOutcome, ExecutionRecord, ExecutionStats, ManagerOptions,
    SandboxManager,
};
pub use policy::{extract_paths, normalize_path, PathWhitelist};
pub use request::ToolRequest;
pub use violation::{Severity, Violation, ViolationKind};
