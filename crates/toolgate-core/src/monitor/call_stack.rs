//! Per-execution call-stack and recursion tracking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Depth and recursion ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStackLimits {
    pub max_depth: usize,
    /// Maximum occurrences of one function name on the stack.
    pub max_recursion: usize,
}

impl Default for CallStackLimits {
    fn default() -> Self {
        Self {
            max_depth: 100,
            max_recursion: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallStackViolation {
    Depth {
        actual: usize,
        limit: usize,
    },
    Recursion {
        function: String,
        actual: usize,
        limit: usize,
    },
}

impl std::fmt::Display for CallStackViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Depth { actual, limit } => {
                write!(f, "call depth {actual} exceeds limit {limit}")
            }
            Self::Recursion {
                function,
                actual,
                limit,
            } => write!(
                f,
                "'{function}' appears {actual} times on the stack (limit {limit})"
            ),
        }
    }
}

/// Tracks an explicit call stack per execution id.
///
/// State for an id lives until [`CallStackMonitor::clear`] is called for it.
#[derive(Debug, Default)]
pub struct CallStackMonitor {
    stacks: Mutex<HashMap<String, Vec<String>>>,
}

impl CallStackMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `function` onto the stack for `execution_id`. Returns the new depth.
    pub async fn enter(&self, execution_id: &str, function: &str) -> usize {
        let mut stacks = self.stacks.lock().await;
        let stack = stacks.entry(execution_id.to_string()).or_default();
        stack.push(function.to_string());
        stack.len()
    }

    /// Pop the top frame, returning its function name.
    pub async fn exit(&self, execution_id: &str) -> Option<String> {
        let mut stacks = self.stacks.lock().await;
        stacks.get_mut(execution_id).and_then(Vec::pop)
    }

    pub async fn depth(&self, execution_id: &str) -> usize {
        let stacks = self.stacks.lock().await;
        stacks.get(execution_id).map_or(0, Vec::len)
    }

    /// Snapshot of the current stack, bottom first.
    pub async fn stack(&self, execution_id: &str) -> Vec<String> {
        let stacks = self.stacks.lock().await;
        stacks.get(execution_id).cloned().unwrap_or_default()
    }

    /// Occurrences of `function` on the stack for `execution_id`.
    pub async fn recursion_count(&self, execution_id: &str, function: &str) -> usize {
        let stacks = self.stacks.lock().await;
        stacks
            .get(execution_id)
            .map_or(0, |s| s.iter().filter(|f| *f == function).count())
    }

    /// Every depth or recursion overrun for `execution_id`.
    pub async fn check_limits(
        &self,
        execution_id: &str,
        limits: &CallStackLimits,
    ) -> Vec<CallStackViolation> {
        let stacks = self.stacks.lock().await;
        let Some(stack) = stacks.get(execution_id) else {
            return Vec::new();
        };

        let mut violations = Vec::new();
        if stack.len() > limits.max_depth {
            violations.push(CallStackViolation::Depth {
                actual: stack.len(),
                limit: limits.max_depth,
            });
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for frame in stack {
            *counts.entry(frame.as_str()).or_insert(0) += 1;
        }
        let mut over: Vec<_> = counts
            .into_iter()
            .filter(|(_, n)| *n > limits.max_recursion)
            .collect();
        over.sort();
        for (function, actual) in over {
            violations.push(CallStackViolation::Recursion {
                function: function.to_string(),
                actual,
                limit: limits.max_recursion,
            });
        }
        violations
    }

    pub async fn clear(&self, execution_id: &str) {
        self.stacks.lock().await.remove(execution_id);
    }

    /// Number of execution ids with live state.
    pub async fn tracked_ids(&self) -> usize {
        self.stacks.lock().await.len()
    }
}
