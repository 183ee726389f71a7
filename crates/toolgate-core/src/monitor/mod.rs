//! Resource monitors consulted by the sandbox manager.
//!
//! - [`network`]   : domain allow/block lists, per-host sliding rate limit
//! - [`memory`]    : shape limits (array/string length, nesting, size) on values
//! - [`call_stack`]: per-execution stack depth and recursion counts
//! - [`quota`]     : CPU time, disk bytes, API calls, concurrent operations
//!
//! Stateful monitors key their state by execution id and never expire it on
//! their own; whoever created an id clears it.

pub mod call_stack;
pub mod memory;
pub mod network;
pub mod quota;

pub use call_stack::{CallStackLimits, CallStackMonitor, CallStackViolation};
pub use memory::{MemoryLimits, MemoryTracker, MemoryViolation};
pub use network::{DenyReason, NetworkDecision, NetworkMonitor, NetworkPolicy, NetworkStats};
pub use quota::{QuotaDimension, QuotaUsage, QuotaViolation, ResourceQuota, ResourceQuotaManager};
