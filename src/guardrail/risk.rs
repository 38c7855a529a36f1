//! Risk assessment: scores a tool call before the approval gate decides.

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Four-tier risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Score < 20.
    Low,
    /// 20 <= score < 50.
    Medium,
    /// 50 <= score < 100.
    High,
    /// Score >= 100.
    Critical,
}

impl RiskLevel {
    fn from_score(score: u32) -> Self {
        if score >= 100 {
            RiskLevel::Critical
        } else if score >= 50 {
            RiskLevel::High
        } else if score >= 20 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Policy inputs for risk scoring.
#[derive(Debug, Clone, Default)]
pub struct RiskPolicy {
    /// Tools always scored at least `+50` (policy-class high risk).
    pub high_risk_tools: HashSet<String>,
    /// Tools always scored at least `+100` (policy-class critical risk).
    pub critical_risk_tools: HashSet<String>,
    /// Regex patterns matched against the tool name: high-risk.
    pub high_risk_name_patterns: Vec<String>,
    /// Regex patterns matched against the tool name: critical-risk.
    pub critical_risk_name_patterns: Vec<String>,
    /// Keyword list matched against the tool name: high-risk.
    pub high_risk_keywords: Vec<String>,
    /// Keyword list matched against the tool name: critical-risk.
    pub critical_risk_keywords: Vec<String>,
    /// Parameter names considered sensitive.
    pub sensitive_parameter_names: HashSet<String>,
    /// Keywords in string parameter values considered destructive.
    pub destructive_value_keywords: Vec<String>,
}

/// The result of a risk assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Aggregate numeric score.
    pub score: u32,
    /// Derived classification.
    pub level: RiskLevel,
    /// Human-readable contributing factors, for audit trails.
    pub factors: Vec<String>,
}

fn compile(patterns: &[String]) -> Option<RegexSet> {
    if patterns.is_empty() {
        return None;
    }
    RegexSet::new(patterns).ok()
}

/// Assesses risk for tool calls against a [`RiskPolicy`] and the recent call
/// history (for the repeat-pattern factor).
pub struct RiskAssessor {
    policy: RiskPolicy,
    high_name_set: Option<RegexSet>,
    critical_name_set: Option<RegexSet>,
}

impl RiskAssessor {
    /// Construct an assessor, compiling the configured regex lists once.
    pub fn new(policy: RiskPolicy) -> Self {
        let high_name_set = compile(&policy.high_risk_name_patterns);
        let critical_name_set = compile(&policy.critical_risk_name_patterns);
        Self {
            policy,
            high_name_set,
            critical_name_set,
        }
    }

    /// Assess one call. `recent_calls` is the last up-to-10 tool names
    /// called in this engine instance, most recent last.
    pub fn assess(
        &self,
        tool_name: &str,
        parameters: &serde_json::Value,
        environment: Option<&str>,
        recent_calls: &VecDeque<String>,
    ) -> RiskAssessment {
        let mut score: u32 = 0;
        let mut factors = Vec::new();

        if self.policy.critical_risk_tools.contains(tool_name) {
            score += 100;
            factors.push("tool is in critical_risk_tools".to_string());
        } else if self.policy.high_risk_tools.contains(tool_name) {
            score += 50;
            factors.push("tool is in high_risk_tools".to_string());
        }

        if self
            .critical_name_set
            .as_ref()
            .is_some_and(|set| set.is_match(tool_name))
            || contains_keyword(tool_name, &self.policy.critical_risk_keywords)
        {
            score += 80;
            factors.push("tool name matches a critical-risk pattern".to_string());
        } else if self
            .high_name_set
            .as_ref()
            .is_some_and(|set| set.is_match(tool_name))
            || contains_keyword(tool_name, &self.policy.high_risk_keywords)
        {
            score += 40;
            factors.push("tool name matches a high-risk pattern".to_string());
        }

        if let Some(object) = parameters.as_object() {
            for key in object.keys() {
                if self.policy.sensitive_parameter_names.contains(key) {
                    score += 30;
                    factors.push(format!("parameter '{key}' is sensitive"));
                }
            }
            for value in object.values() {
                if let Some(s) = value.as_str() {
                    if contains_keyword(s, &self.policy.destructive_value_keywords) {
                        score += 25;
                        factors.push("a parameter value contains a destructive keyword".to_string());
                    }
                    if s.to_lowercase().contains("production") || s.to_lowercase().contains("prod") {
                        score += 35;
                        factors.push("a parameter value references production".to_string());
                    }
                }
            }
        }

        match environment.map(str::to_lowercase).as_deref() {
            Some("production") => {
                score += 30;
                factors.push("environment is production".to_string());
            }
            Some("staging") => {
                score += 15;
                factors.push("environment is staging".to_string());
            }
            _ => {}
        }

        let repeats = recent_calls.iter().filter(|c| c.as_str() == tool_name).count();
        if repeats >= 3 {
            score += 10;
            factors.push(format!("tool repeated {repeats} times in the last 10 calls"));
        }

        let level = RiskLevel::from_score(score);
        RiskAssessment {
            score,
            level,
            factors,
        }
    }
}

fn contains_keyword(haystack: &str, keywords: &[String]) -> bool {
    let lower = haystack.to_lowercase();
    keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn critical_tool_classifies_critical() {
        let mut policy = RiskPolicy::default();
        policy.critical_risk_tools.insert("file_delete".to_string());
        let assessor = RiskAssessor::new(policy);

        let assessment = assessor.assess("file_delete", &json!({}), None, &VecDeque::new());
        assert_eq!(assessment.level, RiskLevel::Critical);
        assert_eq!(assessment.score, 100);
    }

    #[test]
    fn production_environment_adds_score() {
        let assessor = RiskAssessor::new(RiskPolicy::default());
        let assessment = assessor.assess("search", &json!({}), Some("production"), &VecDeque::new());
        assert_eq!(assessment.score, 30);
        assert_eq!(assessment.level, RiskLevel::Medium);
    }

    #[test]
    fn repeat_pattern_adds_score() {
        let assessor = RiskAssessor::new(RiskPolicy::default());
        let mut recent = VecDeque::new();
        for _ in 0..3 {
            recent.push_back("search".to_string());
        }
        let assessment = assessor.assess("search", &json!({}), None, &recent);
        assert_eq!(assessment.score, 10);
    }

    #[test]
    fn sensitive_parameter_adds_score() {
        let mut policy = RiskPolicy::default();
        policy.sensitive_parameter_names.insert("api_key".to_string());
        let assessor = RiskAssessor::new(policy);
        let assessment = assessor.assess("call_api", &json!({"api_key": "x"}), None, &VecDeque::new());
        assert_eq!(assessment.score, 30);
    }
}
