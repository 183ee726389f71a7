//! Path whitelist applied to path-bearing tool arguments.

use regex::Regex;
use serde_json::Value;

use super::error::ConfigError;

/// Argument keys whose string values are treated as paths.
pub const PATH_KEYS: &[&str] = &["path", "file_path", "filename", "source", "destination"];

/// Argument key holding an array of paths.
pub const PATH_LIST_KEY: &str = "paths";

#[derive(Debug, Clone)]
enum Matcher {
    /// Normalised path prefix.
    Prefix(String),
    /// `.` or `./`: any relative path that stays below the working directory.
    CurrentDir,
    /// Pattern containing `*`, matched against the whole normalised path.
    Wildcard(Regex),
}

#[derive(Debug, Clone)]
struct PathPattern {
    raw: String,
    matcher: Matcher,
}

impl PathPattern {
    fn compile(raw: &str) -> Result<Self, ConfigError> {
        let normalized = normalize_path(raw);
        let matcher = if normalized.contains('*') {
            let body = normalized
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let re = Regex::new(&format!("^{body}$")).map_err(|e| {
                ConfigError::InvalidPathPattern {
                    pattern: raw.to_string(),
                    reason: e.to_string(),
                }
            })?;
            Matcher::Wildcard(re)
        } else if normalized.is_empty() {
            Matcher::CurrentDir
        } else {
            Matcher::Prefix(normalized)
        };
        Ok(Self {
            raw: raw.to_string(),
            matcher,
        })
    }

    fn matches(&self, normalized: &str) -> bool {
        match &self.matcher {
            Matcher::Prefix(prefix) => normalized.starts_with(prefix.as_str()),
            Matcher::CurrentDir => {
                !normalized.starts_with('/')
                    && normalized != ".."
                    && !normalized.starts_with("../")
            }
            Matcher::Wildcard(re) => re.is_match(normalized),
        }
    }
}

/// Compiled set of allowed-path patterns.
///
/// A path is allowed when the whitelist is empty, or when its lexically
/// normalised form starts with a normalised pattern or matches the pattern
/// with each `*` read as "any sequence of characters".
#[derive(Debug, Clone, Default)]
pub struct PathWhitelist {
    patterns: Vec<PathPattern>,
}

impl PathWhitelist {
    pub fn compile(patterns: &[String]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|raw| PathPattern::compile(raw))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { patterns })
    }

    pub fn is_unrestricted(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.raw.as_str())
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let normalized = normalize_path(path);
        self.patterns.iter().any(|p| p.matches(&normalized))
    }

    /// Every path argument in `args` that the whitelist rejects.
    pub fn rejected_paths(&self, args: &Value) -> Vec<String> {
        if self.is_unrestricted() {
            return Vec::new();
        }
        extract_paths(args)
            .into_iter()
            .filter(|p| !self.is_allowed(p))
            .collect()
    }
}

/// Collect path-bearing string arguments from a top-level JSON object.
pub fn extract_paths(args: &Value) -> Vec<String> {
    let Some(map) = args.as_object() else {
        return Vec::new();
    };
    let mut paths: Vec<String> = PATH_KEYS
        .iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    if let Some(list) = map.get(PATH_LIST_KEY).and_then(Value::as_array) {
        paths.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
    }
    paths
}

/// Lexically resolve `.` and `..` segments and collapse repeated separators.
///
/// `..` that would climb above the start is kept, so `../x` never matches a
/// relative prefix like `src/`.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let mut out = parts.join("/");
    if absolute {
        out.insert(0, '/');
    }
    if path.ends_with('/') && !out.ends_with('/') && !parts.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wl(patterns: &[&str]) -> PathWhitelist {
        let owned: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        PathWhitelist::compile(&owned).unwrap()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src//lib.rs"), "src/lib.rs");
        assert_eq!(normalize_path("src/../etc/passwd"), "etc/passwd");
        assert_eq!(normalize_path("../secret"), "../secret");
        assert_eq!(normalize_path("/a/b/../c"), "/a/c");
        assert_eq!(normalize_path("/../x"), "/x");
        assert_eq!(normalize_path("src/"), "src/");
    }

    #[test]
    fn test_empty_whitelist_allows_everything() {
        let w = wl(&[]);
        assert!(w.is_unrestricted());
        assert!(w.is_allowed("/etc/shadow"));
        assert!(w.rejected_paths(&json!({"path": "/etc/shadow"})).is_empty());
    }

    #[test]
    fn test_prefix_match() {
        let w = wl(&["src/"]);
        assert!(w.is_allowed("src/test.ts"));
        assert!(w.is_allowed("./src/deep/mod.rs"));
        assert!(!w.is_allowed("tests/a.rs"));
    }

    #[test]
    fn test_traversal_does_not_escape_prefix() {
        let w = wl(&["src/"]);
        assert!(!w.is_allowed("src/../Cargo.toml"));
        assert!(!w.is_allowed("../src/x"));
    }

    #[test]
    fn test_wildcard_match() {
        let w = wl(&["docs/*.md", "/tmp/*/out.log"]);
        assert!(w.is_allowed("docs/readme.md"));
        assert!(!w.is_allowed("docs/readme.txt"));
        assert!(w.is_allowed("/tmp/run-1/out.log"));
        // Regex metacharacters in patterns are literal.
        let dotted = wl(&["a.b/*"]);
        assert!(!dotted.is_allowed("axb/c"));
    }

    #[test]
    fn test_dot_prefixed_patterns_are_normalised() {
        let w = wl(&["./docs/*.md"]);
        assert!(w.is_allowed("./docs/readme.md"));
        assert!(w.is_allowed("docs/guide.md"));
        assert!(!w.is_allowed("src/readme.md"));

        let w = wl(&["./src/"]);
        assert!(w.is_allowed("src/lib.rs"));
        assert!(!w.is_allowed("tests/a.rs"));
    }

    #[test]
    fn test_current_dir_pattern() {
        for pattern in ["./", "."] {
            let w = wl(&[pattern]);
            assert!(w.is_allowed("./src/a.rs"), "{pattern}");
            assert!(w.is_allowed("Cargo.toml"), "{pattern}");
            assert!(!w.is_allowed("../outside"), "{pattern}");
            assert!(!w.is_allowed("src/../../outside"), "{pattern}");
            assert!(!w.is_allowed("/etc/passwd"), "{pattern}");
        }
    }

    #[test]
    fn test_rejected_paths_scans_known_keys() {
        let w = wl(&["src/"]);
        let args = json!({
            "source": "src/a.rs",
            "destination": "/etc/a.rs",
            "paths": ["src/b.rs", "target/c"],
            "content": "not a path key"
        });
        assert_eq!(w.rejected_paths(&args), vec!["/etc/a.rs", "target/c"]);
    }
}
