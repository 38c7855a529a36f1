//! Deterministic permission checking: the first guardrail pipeline stage.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Per-tool parameter restrictions.
#[derive(Debug, Clone, Default)]
pub struct ParameterRestrictions {
    /// If non-empty, only these parameter names may be present.
    pub allowed_parameters: HashSet<String>,
    /// Parameter name -> values that are never permitted.
    pub blocked_parameter_values: HashMap<String, HashSet<String>>,
}

/// A per-tool permission entry, overriding the engine's global defaults.
#[derive(Debug, Clone)]
pub struct ToolPermission {
    /// Explicit allow/deny; `None` defers to the global policy.
    pub allowed: Option<bool>,
    /// Parameter-level restrictions.
    pub restrictions: ParameterRestrictions,
    /// Calls per sliding one-minute window; `None` means unbounded.
    pub rate_limit_per_minute: Option<u32>,
}

impl Default for ToolPermission {
    fn default() -> Self {
        Self {
            allowed: None,
            restrictions: ParameterRestrictions::default(),
            rate_limit_per_minute: None,
        }
    }
}

/// The global permission policy.
#[derive(Debug, Clone, Default)]
pub struct PermissionPolicy {
    /// Per-tool overrides.
    pub tool_permissions: HashMap<String, ToolPermission>,
    /// Tools that are never allowed, regardless of `allowed_tools`.
    pub blocked_tools: HashSet<String>,
    /// If non-empty, only tools in this set (and not blocked) are allowed.
    pub allowed_tools: HashSet<String>,
    /// Fallback when neither an explicit entry nor an allowlist applies.
    pub default_allowed: bool,
}

/// The outcome of a permission check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDecision {
    /// Whether the call may proceed.
    pub allowed: bool,
    /// Human-readable reason.
    pub reason: String,
    /// The rule that produced the decision, for audit trails.
    pub matched_rule: String,
}

struct RateLimiter {
    calls: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Record a call and report whether it stays within `limit` calls per
    /// the trailing one-minute window.
    fn check_and_record(&self, tool_name: &str, limit: u32) -> bool {
        let now = Instant::now();
        let mut calls = self.calls.lock();
        let entry = calls.entry(tool_name.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < Duration::from_secs(60));
        if entry.len() as u32 >= limit {
            return false;
        }
        entry.push(now);
        true
    }
}

/// Evaluates the permission policy for incoming tool calls.
pub struct PermissionChecker {
    policy: PermissionPolicy,
    limiter: RateLimiter,
}

impl PermissionChecker {
    /// Construct a checker from a policy.
    pub fn new(policy: PermissionPolicy) -> Self {
        Self {
            policy,
            limiter: RateLimiter::new(),
        }
    }

    /// Check whether `tool_name` may be called with `parameters`.
    pub fn check(&self, tool_name: &str, parameters: &serde_json::Value) -> PermissionDecision {
        if let Some(permission) = self.policy.tool_permissions.get(tool_name) {
            if let Some(false) = permission.allowed {
                return PermissionDecision {
                    allowed: false,
                    reason: format!("tool '{tool_name}' is explicitly denied"),
                    matched_rule: "tool_permissions.allowed=false".into(),
                };
            }
        }

        if self.policy.blocked_tools.contains(tool_name) {
            return PermissionDecision {
                allowed: false,
                reason: format!("tool '{tool_name}' is not allowed"),
                matched_rule: "blocked_tools".into(),
            };
        }

        if !self.policy.allowed_tools.is_empty() && !self.policy.allowed_tools.contains(tool_name) {
            return PermissionDecision {
                allowed: false,
                reason: format!("tool '{tool_name}' is not in the allowed_tools allowlist"),
                matched_rule: "allowed_tools".into(),
            };
        }

        if let Some(decision) = self.check_parameters(tool_name, parameters) {
            return decision;
        }

        if let Some(permission) = self.policy.tool_permissions.get(tool_name) {
            if let Some(limit) = permission.rate_limit_per_minute {
                if !self.limiter.check_and_record(tool_name, limit) {
                    return PermissionDecision {
                        allowed: false,
                        reason: format!("tool '{tool_name}' exceeded its rate limit"),
                        matched_rule: "rate_limit_per_minute".into(),
                    };
                }
            }
        }

        let allowed = match self.policy.tool_permissions.get(tool_name).and_then(|p| p.allowed) {
            Some(allowed) => allowed,
            None => self.policy.default_allowed,
        };

        PermissionDecision {
            allowed,
            reason: if allowed {
                "allowed by default policy".into()
            } else {
                "default_allowed is false".into()
            },
            matched_rule: "default_allowed".into(),
        }
    }

    fn check_parameters(
        &self,
        tool_name: &str,
        parameters: &serde_json::Value,
    ) -> Option<PermissionDecision> {
        let permission = self.policy.tool_permissions.get(tool_name)?;
        let object = parameters.as_object()?;

        if !permission.restrictions.allowed_parameters.is_empty() {
            for key in object.keys() {
                if !permission.restrictions.allowed_parameters.contains(key) {
                    return Some(PermissionDecision {
                        allowed: false,
                        reason: format!("parameter '{key}' is not allowed for tool '{tool_name}'"),
                        matched_rule: "allowed_parameters".into(),
                    });
                }
            }
        }

        for (key, blocked_values) in &permission.restrictions.blocked_parameter_values {
            if let Some(value) = object.get(key) {
                let as_str = value.as_str().unwrap_or_default();
                if blocked_values.contains(as_str) {
                    return Some(PermissionDecision {
                        allowed: false,
                        reason: format!("parameter '{key}' has a blocked value"),
                        matched_rule: "blocked_parameter_values".into(),
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blocked_tool_is_denied() {
        let mut policy = PermissionPolicy {
            default_allowed: true,
            ..Default::default()
        };
        policy.blocked_tools.insert("file_delete".to_string());
        let checker = PermissionChecker::new(policy);

        let decision = checker.check("file_delete", &json!({}));
        assert!(!decision.allowed);
        assert_eq!(decision.matched_rule, "blocked_tools");
    }

    #[test]
    fn allowlist_restricts_to_listed_tools() {
        let mut policy = PermissionPolicy {
            default_allowed: true,
            ..Default::default()
        };
        policy.allowed_tools.insert("search".to_string());
        let checker = PermissionChecker::new(policy);

        assert!(checker.check("search", &json!({})).allowed);
        assert!(!checker.check("other_tool", &json!({})).allowed);
    }

    #[test]
    fn rate_limit_denies_after_threshold() {
        let mut policy = PermissionPolicy {
            default_allowed: true,
            ..Default::default()
        };
        policy.tool_permissions.insert(
            "search".to_string(),
            ToolPermission {
                rate_limit_per_minute: Some(2),
                ..Default::default()
            },
        );
        let checker = PermissionChecker::new(policy);

        assert!(checker.check("search", &json!({})).allowed);
        assert!(checker.check("search", &json!({})).allowed);
        assert!(!checker.check("search", &json!({})).allowed);
    }

    #[test]
    fn blocked_parameter_values_are_denied() {
        let mut policy = PermissionPolicy {
            default_allowed: true,
            ..Default::default()
        };
        let mut blocked = HashMap::new();
        blocked.insert("path".to_string(), HashSet::from(["/etc/passwd".to_string()]));
        policy.tool_permissions.insert(
            "read_file".to_string(),
            ToolPermission {
                restrictions: ParameterRestrictions {
                    blocked_parameter_values: blocked,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let checker = PermissionChecker::new(policy);
        let decision = checker.check("read_file", &json!({"path": "/etc/passwd"}));
        assert!(!decision.allowed);
    }
}
