//! Data-isolation check: guards memory-access operations annotated as sensitive.

use regex::RegexSet;
use std::collections::HashSet;

/// Policy for cross-session / denylisted-key access.
#[derive(Debug, Clone, Default)]
pub struct IsolationPolicy {
    /// Regex patterns over memory keys that are never accessible from a
    /// sensitive operation.
    pub denylist_patterns: Vec<String>,
    /// Keys explicitly permitted to be read across session boundaries.
    pub allowed_shared_keys: HashSet<String>,
}

/// The outcome of an isolation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationDecision {
    /// Whether access is permitted.
    pub allowed: bool,
    /// Human-readable reason.
    pub reason: String,
}

/// Enforces [`IsolationPolicy`] on sensitive memory operations.
pub struct IsolationChecker {
    denylist: Option<RegexSet>,
    allowed_shared_keys: HashSet<String>,
}

impl IsolationChecker {
    /// Construct a checker from a policy.
    pub fn new(policy: IsolationPolicy) -> Self {
        let denylist = if policy.denylist_patterns.is_empty() {
            None
        } else {
            RegexSet::new(&policy.denylist_patterns).ok()
        };
        Self {
            denylist,
            allowed_shared_keys: policy.allowed_shared_keys,
        }
    }

    /// Check access to `key`. `cross_session` indicates the access crosses
    /// a session boundary (e.g. reading another session's memory snapshot).
    pub fn check(&self, key: &str, cross_session: bool) -> IsolationDecision {
        if let Some(set) = &self.denylist {
            if set.is_match(key) {
                return IsolationDecision {
                    allowed: false,
                    reason: format!("key '{key}' matches a data-isolation denylist pattern"),
                };
            }
        }
        if cross_session && !self.allowed_shared_keys.contains(key) {
            return IsolationDecision {
                allowed: false,
                reason: format!("key '{key}' is not in allowed_shared_keys for cross-session access"),
            };
        }
        IsolationDecision {
            allowed: true,
            reason: "allowed".to_string(),
        }
    }
}
