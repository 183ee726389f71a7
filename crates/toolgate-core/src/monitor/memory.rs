//! Shape-based memory limits for tool arguments and outputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Nesting below this many levels is not inspected.
const RECURSION_GUARD: usize = 64;

/// Ceilings on the shape of a single JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimits {
    /// Ceiling on the estimated serialized size of a value, in bytes.
    pub max_heap_bytes: u64,
    pub max_array_length: usize,
    pub max_string_length: usize,
    pub max_object_depth: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_heap_bytes: 200 * 1024 * 1024,
            max_array_length: 100_000,
            max_string_length: 10 * 1024 * 1024,
            max_object_depth: 32,
        }
    }
}

/// A single exceeded memory limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryViolation {
    HeapSize { actual: u64, limit: u64 },
    ArrayLength { actual: usize, limit: usize },
    StringLength { actual: usize, limit: usize },
    ObjectDepth { actual: usize, limit: usize },
}

impl std::fmt::Display for MemoryViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeapSize { actual, limit } => {
                write!(f, "value size {actual} bytes exceeds limit {limit}")
            }
            Self::ArrayLength { actual, limit } => {
                write!(f, "array length {actual} exceeds limit {limit}")
            }
            Self::StringLength { actual, limit } => {
                write!(f, "string length {actual} exceeds limit {limit}")
            }
            Self::ObjectDepth { actual, limit } => {
                write!(f, "nesting depth {actual} exceeds limit {limit}")
            }
        }
    }
}

/// Stateless inspector applying [`MemoryLimits`] to values.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryTracker;

#[derive(Default)]
struct Shape {
    longest_array: usize,
    longest_string: usize,
    depth: usize,
}

impl MemoryTracker {
    /// Return every limit `value` violates (not just the first).
    pub fn check_limits(value: &Value, limits: &MemoryLimits) -> Vec<MemoryViolation> {
        let mut shape = Shape::default();
        measure(value, 0, &mut shape);

        let mut violations = Vec::new();
        let size = estimate_size(value);
        if size > limits.max_heap_bytes {
            violations.push(MemoryViolation::HeapSize {
                actual: size,
                limit: limits.max_heap_bytes,
            });
        }
        if shape.longest_array > limits.max_array_length {
            violations.push(MemoryViolation::ArrayLength {
                actual: shape.longest_array,
                limit: limits.max_array_length,
            });
        }
        if shape.longest_string > limits.max_string_length {
            violations.push(MemoryViolation::StringLength {
                actual: shape.longest_string,
                limit: limits.max_string_length,
            });
        }
        if shape.depth > limits.max_object_depth {
            violations.push(MemoryViolation::ObjectDepth {
                actual: shape.depth,
                limit: limits.max_object_depth,
            });
        }
        violations
    }
}

/// Nesting depth counts containers: `1` is depth 0, `[1]` is depth 1.
fn measure(value: &Value, depth: usize, shape: &mut Shape) {
    shape.depth = shape.depth.max(depth);
    if depth >= RECURSION_GUARD {
        return;
    }
    match value {
        Value::String(s) => {
            shape.longest_string = shape.longest_string.max(s.chars().count());
        }
        Value::Array(items) => {
            shape.longest_array = shape.longest_array.max(items.len());
            for item in items {
                measure(item, depth + 1, shape);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                shape.longest_string = shape.longest_string.max(key.chars().count());
                measure(item, depth + 1, shape);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Approximate in-memory footprint as the compact JSON encoding length.
pub fn estimate_size(value: &Value) -> u64 {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tight() -> MemoryLimits {
        MemoryLimits {
            max_heap_bytes: 1024,
            max_array_length: 3,
            max_string_length: 8,
            max_object_depth: 2,
        }
    }

    #[test]
    fn test_within_limits() {
        let v = json!({"path": "a.txt", "lines": [1, 2]});
        assert!(MemoryTracker::check_limits(&v, &tight()).is_empty());
    }

    #[test]
    fn test_reports_all_violations() {
        let v = json!({
            "items": [1, 2, 3, 4],
            "text": "much longer than eight",
            "deep": {"a": {"b": {"c": 1}}}
        });
        let violations = MemoryTracker::check_limits(&v, &tight());
        assert_eq!(violations.len(), 3);
        assert!(violations
            .iter()
            .any(|v| matches!(v, MemoryViolation::ArrayLength { actual: 4, limit: 3 })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, MemoryViolation::StringLength { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, MemoryViolation::ObjectDepth { actual: 4, limit: 2 })));
    }

    #[test]
    fn test_heap_size_ceiling() {
        let limits = MemoryLimits {
            max_heap_bytes: 10,
            ..MemoryLimits::default()
        };
        let v = json!({"content": "0123456789"});
        let violations = MemoryTracker::check_limits(&v, &limits);
        assert!(matches!(violations[0], MemoryViolation::HeapSize { limit: 10, .. }));
    }

    #[test]
    fn test_recursion_guard_bounds_depth() {
        let mut v = json!(0);
        for _ in 0..200 {
            v = json!([v]);
        }
        let violations = MemoryTracker::check_limits(&v, &MemoryLimits::default());
        assert!(violations.iter().any(|v| matches!(
            v,
            MemoryViolation::ObjectDepth { actual, .. } if *actual == RECURSION_GUARD
        )));
    }

    #[test]
    fn test_scalar_has_zero_depth() {
        let limits = MemoryLimits {
            max_object_depth: 0,
            ..MemoryLimits::default()
        };
        assert!(MemoryTracker::check_limits(&json!(42), &limits).is_empty());
    }

    #[test]
    fn test_violation_json_keeps_numeric_limit() {
        let v = MemoryViolation::ArrayLength {
            actual: 4,
            limit: 3,
        };
        let value = serde_json::to_value(&v).unwrap();
        assert_eq!(value, json!({"kind": "array_length", "actual": 4, "limit": 3}));
        let back: MemoryViolation = serde_json::from_value(value).unwrap();
        assert_eq!(back, v);
    }
}
