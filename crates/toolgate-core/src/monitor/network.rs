//! Network request policy: domain block/allow lists and per-host rate limits.
//!
//! Every check, allowed or not, lands in a bounded request log and in the
//! per-host timestamp window used for the sliding one-minute rate limit.
//! Windows only keep stamps that can still affect a decision, and hosts with
//! no live stamps are dropped. The clock is `tokio::time::Instant`, so tests
//! can pause and advance time.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::ring::BoundedLog;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Outbound network rules for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    /// Hosts (or `*.suffix`, or `*`) allowed; empty means no allow-list.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Substrings that block any host containing them.
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    pub max_requests_per_minute: u32,
    pub max_response_bytes: u64,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            max_requests_per_minute: 60,
            max_response_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Blocked,
    NotInAllowlist,
    RateLimitExceeded,
    InvalidUrl,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked"),
            Self::NotInAllowlist => write!(f, "not in allowlist"),
            Self::RateLimitExceeded => write!(f, "rate limit exceeded"),
            Self::InvalidUrl => write!(f, "invalid URL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDecision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl NetworkDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// One entry of the request log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub url: String,
    pub host: Option<String>,
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    pub requests_by_domain: BTreeMap<String, u64>,
}

#[derive(Debug)]
struct NetworkState {
    log: BoundedLog<RequestRecord>,
    windows: HashMap<String, VecDeque<Instant>>,
    stats: NetworkStats,
}

impl NetworkState {
    /// Drop expired stamps, and hosts left with none.
    fn sweep_windows(&mut self, now: Instant) {
        self.windows.retain(|_, window| {
            while window
                .front()
                .is_some_and(|t| now.duration_since(*t) >= RATE_WINDOW)
            {
                window.pop_front();
            }
            !window.is_empty()
        });
    }
}

/// Shared request monitor. Per-host windows are intentionally shared across
/// executions.
#[derive(Debug)]
pub struct NetworkMonitor {
    state: Mutex<NetworkState>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl NetworkMonitor {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            state: Mutex::new(NetworkState {
                log: BoundedLog::new(log_capacity),
                windows: HashMap::new(),
                stats: NetworkStats::default(),
            }),
        }
    }

    /// Decide whether a request to `url` is allowed under `policy`.
    pub async fn is_request_allowed(&self, url: &str, policy: &NetworkPolicy) -> NetworkDecision {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        let now = Instant::now();

        let mut state = self.state.lock().await;
        state.sweep_windows(now);

        let decision = match &host {
            None => NetworkDecision::deny(DenyReason::InvalidUrl),
            Some(host) => {
                if policy
                    .blocked_domains
                    .iter()
                    .any(|b| !b.is_empty() && host.contains(&b.to_ascii_lowercase()))
                {
                    NetworkDecision::deny(DenyReason::Blocked)
                } else if !policy.allowed_domains.is_empty()
                    && !policy.allowed_domains.iter().any(|a| host_matches(host, a))
                {
                    NetworkDecision::deny(DenyReason::NotInAllowlist)
                } else if state.windows.get(host).map_or(0, VecDeque::len)
                    >= policy.max_requests_per_minute as usize
                {
                    NetworkDecision::deny(DenyReason::RateLimitExceeded)
                } else {
                    NetworkDecision::allow()
                }
            }
        };

        if let Some(host) = &host {
            // Only the newest `max_requests_per_minute` stamps can decide a
            // later check, so older ones are dropped.
            let cap = (policy.max_requests_per_minute as usize).max(1);
            let window = state.windows.entry(host.clone()).or_default();
            window.push_back(now);
            while window.len() > cap {
                window.pop_front();
            }
            *state
                .stats
                .requests_by_domain
                .entry(host.clone())
                .or_insert(0) += 1;
        }
        state.stats.total_requests += 1;
        if decision.allowed {
            state.stats.allowed_requests += 1;
        } else {
            state.stats.blocked_requests += 1;
            debug!(url = %url, reason = ?decision.reason, "network request denied");
        }
        state.log.push(RequestRecord {
            url: url.to_string(),
            host,
            allowed: decision.allowed,
            reason: decision.reason,
            timestamp: Utc::now(),
        });

        decision
    }

    pub fn is_response_size_allowed(size: u64, policy: &NetworkPolicy) -> bool {
        size <= policy.max_response_bytes
    }

    pub async fn stats(&self) -> NetworkStats {
        self.state.lock().await.stats.clone()
    }

    /// Up to `limit` most recent request records, oldest first.
    pub async fn recent_requests(&self, limit: usize) -> Vec<RequestRecord> {
        let state = self.state.lock().await;
        state.log.recent(limit).cloned().collect()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.log.clear();
        state.windows.clear();
        state.stats = NetworkStats::default();
    }
}

/// `*` matches everything, `*.example.com` matches subdomains, a bare domain
/// matches itself and its subdomains.
fn host_matches(host: &str, entry: &str) -> bool {
    let entry = entry.trim().to_ascii_lowercase();
    if entry == "*" {
        return true;
    }
    if let Some(suffix) = entry.strip_prefix("*.") {
        return host.ends_with(&format!(".{suffix}"));
    }
    host == entry || host.ends_with(&format!(".{entry}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(rpm: u32) -> NetworkPolicy {
        NetworkPolicy {
            max_requests_per_minute: rpm,
            ..NetworkPolicy::default()
        }
    }

    #[test]
    fn test_host_matches() {
        assert!(host_matches("api.github.com", "github.com"));
        assert!(host_matches("github.com", "github.com"));
        assert!(!host_matches("notgithub.com", "github.com"));
        assert!(host_matches("a.b.example.org", "*.example.org"));
        assert!(!host_matches("example.org", "*.example.org"));
        assert!(host_matches("anything.io", "*"));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let m = NetworkMonitor::default();
        let d = m.is_request_allowed("not a url", &policy(10)).await;
        assert_eq!(d.reason, Some(DenyReason::InvalidUrl));
        assert_eq!(m.stats().await.blocked_requests, 1);
    }

    #[tokio::test]
    async fn test_blocked_substring() {
        let m = NetworkMonitor::default();
        let p = NetworkPolicy {
            blocked_domains: vec!["evil".into()],
            ..policy(10)
        };
        let d = m.is_request_allowed("https://cdn.evil-corp.net/x", &p).await;
        assert_eq!(d.reason, Some(DenyReason::Blocked));
    }

    #[tokio::test]
    async fn test_allowlist() {
        let m = NetworkMonitor::default();
        let p = NetworkPolicy {
            allowed_domains: vec!["docs.rs".into()],
            ..policy(10)
        };
        assert!(m.is_request_allowed("https://docs.rs/tokio", &p).await.allowed);
        let d = m.is_request_allowed("https://crates.io/", &p).await;
        assert_eq!(d.reason, Some(DenyReason::NotInAllowlist));

        let wildcard = NetworkPolicy {
            allowed_domains: vec!["*".into()],
            ..policy(10)
        };
        assert!(m.is_request_allowed("https://crates.io/", &wildcard).await.allowed);
    }

    #[tokio::test]
    async fn test_response_size() {
        let p = NetworkPolicy {
            max_response_bytes: 100,
            ..policy(10)
        };
        assert!(NetworkMonitor::is_response_size_allowed(100, &p));
        assert!(!NetworkMonitor::is_response_size_allowed(101, &p));
    }

    #[tokio::test]
    async fn test_request_log_is_bounded() {
        let m = NetworkMonitor::new(2);
        for i in 0..5 {
            m.is_request_allowed(&format!("https://h{i}.example/"), &policy(10))
                .await;
        }
        let recent = m.recent_requests(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].host.as_deref(), Some("h4.example"));
        assert_eq!(m.stats().await.total_requests, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_window_slides() {
        let m = NetworkMonitor::default();
        let p = policy(2);
        let url = "https://api.example.com/v1";
        assert!(m.is_request_allowed(url, &p).await.allowed);
        assert!(m.is_request_allowed(url, &p).await.allowed);
        let d = m.is_request_allowed(url, &p).await;
        assert_eq!(d.reason, Some(DenyReason::RateLimitExceeded));
        // Other hosts have their own window.
        assert!(m.is_request_allowed("https://other.example.com/", &p).await.allowed);

        tokio::time::advance(RATE_WINDOW + Duration::from_secs(1)).await;
        assert!(m.is_request_allowed(url, &p).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_hosts_do_not_grow_windows() {
        let m = NetworkMonitor::default();
        let p = NetworkPolicy {
            blocked_domains: vec!["evil".into()],
            ..policy(5)
        };
        for _ in 0..10_000 {
            m.is_request_allowed("https://evil.example/x", &p).await;
        }
        assert_eq!(m.state.lock().await.windows["evil.example"].len(), 5);
        assert_eq!(m.stats().await.blocked_requests, 10_000);

        tokio::time::advance(RATE_WINDOW).await;
        m.is_request_allowed("https://fine.example/", &p).await;
        let state = m.state.lock().await;
        assert!(!state.windows.contains_key("evil.example"));
        assert_eq!(state.windows["fine.example"].len(), 1);
    }
}
