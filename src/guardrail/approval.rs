//! The approval gate: the guardrail pipeline's third stage.
//!
//! Vocabulary generalized from the teacher's human-in-the-loop approval
//! workflow (`ApprovalRequest`/`RiskLevel`) to the spec's single-callback
//! contract: `request_approval(ApprovalRequest) -> bool`, called once per
//! pending approval and awaited with a timeout that denies on expiry.

use crate::guardrail::risk::RiskLevel;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// When an approval is required before a tool call proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Every call requires approval.
    Always,
    /// Only the first time a given tool is seen by this engine instance.
    FirstTime,
    /// Only when the assessed risk score meets `risk_threshold_for_approval`.
    Threshold,
}

/// Approval gate configuration.
#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    /// Gating mode.
    pub mode: ApprovalMode,
    /// Minimum risk score requiring approval under `Threshold` mode.
    pub risk_threshold_for_approval: u32,
    /// How long to wait for a decision before denying.
    pub approval_timeout_seconds: u64,
    /// Whether a `critical` risk classification always forces an approval
    /// request regardless of `mode` (spec §8 invariant).
    pub auto_escalate_critical: bool,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            mode: ApprovalMode::Threshold,
            risk_threshold_for_approval: 50,
            approval_timeout_seconds: 300,
            auto_escalate_critical: true,
        }
    }
}

/// A request for an external approval decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique request id.
    pub request_id: String,
    /// The tool call under review.
    pub tool_name: String,
    /// Parameters the tool would be called with.
    pub parameters: serde_json::Value,
    /// Assessed risk level.
    pub risk_level: RiskLevel,
    /// Assessed numeric risk score.
    pub risk_score: u32,
    /// Session this call belongs to, if any.
    pub session_id: Option<String>,
    /// Why approval was required (mode name or "auto_escalate_critical").
    pub reason: String,
}

/// An approval decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalResponse {
    /// The call may proceed.
    Approved,
    /// The call is denied.
    Denied,
}

/// External approval callback contract.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    /// Request a decision for `request`, awaited once per pending approval.
    async fn request_approval(&self, request: &ApprovalRequest) -> bool;
}

/// Decides whether an approval is required and drives the external
/// callback, bounding the wait with a timeout that denies on expiry.
pub struct ApprovalGate {
    policy: ApprovalPolicy,
    callback: Arc<dyn ApprovalCallback>,
    seen_tools: Mutex<HashSet<String>>,
    pending: Mutex<HashMap<String, ()>>,
}

impl ApprovalGate {
    /// Construct a gate with a policy and an external callback.
    pub fn new(policy: ApprovalPolicy, callback: Arc<dyn ApprovalCallback>) -> Self {
        Self {
            policy,
            callback,
            seen_tools: Mutex::new(HashSet::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the given risk level/score requires approval under the
    /// configured mode. Also marks the tool as seen for `FirstTime` mode.
    pub fn requires_approval(&self, tool_name: &str, risk_level: RiskLevel, risk_score: u32) -> bool {
        if self.policy.auto_escalate_critical && risk_level == RiskLevel::Critical {
            return true;
        }
        match self.policy.mode {
            ApprovalMode::Always => true,
            ApprovalMode::FirstTime => {
                let mut seen = self.seen_tools.lock();
                seen.insert(tool_name.to_string())
            }
            ApprovalMode::Threshold => risk_score >= self.policy.risk_threshold_for_approval,
        }
    }

    /// Drive the approval for `request`, deny on timeout.
    pub async fn decide(&self, request: ApprovalRequest) -> ApprovalResponse {
        self.pending.lock().insert(request.request_id.clone(), ());
        let timeout = Duration::from_secs(self.policy.approval_timeout_seconds);
        let callback = self.callback.clone();
        let request_id = request.request_id.clone();

        let result = tokio::time::timeout(timeout, async move {
            callback.request_approval(&request).await
        })
        .await;

        self.pending.lock().remove(&request_id);

        match result {
            Ok(true) => ApprovalResponse::Approved,
            Ok(false) => ApprovalResponse::Denied,
            Err(_) => ApprovalResponse::Denied,
        }
    }

    /// Number of approvals currently awaiting a decision.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// A callback that always approves, for tests and for engines configured
/// with "no approval gate in this environment".
#[derive(Debug, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalCallback for AutoApprove {
    async fn request_approval(&self, _request: &ApprovalRequest) -> bool {
        true
    }
}

/// A callback that always denies.
#[derive(Debug, Default)]
pub struct AutoDeny;

#[async_trait]
impl ApprovalCallback for AutoDeny {
    async fn request_approval(&self, _request: &ApprovalRequest) -> bool {
        false
    }
}
