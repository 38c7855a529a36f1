//! The guardrail engine: permission → risk → approval → audit → data isolation.
//!
//! Wraps every tool invocation dispatched from an LLM turn (§4.3/§4.4).
//! `fail_closed` governs what happens when a stage itself errors internally:
//! when true, any internal failure denies the call; when false, it allows
//! the call through with an audit event recording the failure.

pub mod approval;
pub mod audit;
pub mod isolation;
pub mod permission;
pub mod risk;

use crate::events::EventBus;
use approval::{ApprovalGate, ApprovalResponse};
use audit::{AuditEvent, AuditLog};
use isolation::{IsolationChecker, IsolationPolicy};
use parking_lot::Mutex;
use permission::{PermissionChecker, PermissionPolicy};
use risk::{RiskAssessor, RiskPolicy};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

/// The outcome of running a tool call through the full pipeline.
#[derive(Debug, Clone)]
pub enum GuardrailVerdict {
    /// The call may proceed.
    Allow,
    /// The call is blocked; `reason` becomes the tool result content.
    Block {
        /// Human-readable reason surfaced to the LLM.
        reason: String,
    },
}

impl GuardrailVerdict {
    /// Whether the call is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardrailVerdict::Allow)
    }
}

/// Configuration bundle for constructing a [`GuardrailEngine`].
pub struct GuardrailConfig {
    /// Permission policy.
    pub permission: PermissionPolicy,
    /// Risk policy.
    pub risk: RiskPolicy,
    /// Approval policy.
    pub approval: approval::ApprovalPolicy,
    /// Data-isolation policy.
    pub isolation: IsolationPolicy,
    /// Where to append the audit log, if anywhere.
    pub audit_file_path: Option<PathBuf>,
    /// Event bus to publish audit events on, if any.
    pub event_bus: Option<EventBus>,
    /// Whether internal pipeline errors deny (`true`) or allow (`false`) the call.
    pub fail_closed: bool,
}

/// Orchestrates the permission → risk → approval → audit pipeline for tool
/// calls, plus a standalone data-isolation check for sensitive memory
/// operations.
pub struct GuardrailEngine {
    permission: PermissionChecker,
    risk: RiskAssessor,
    approval: ApprovalGate,
    audit: AuditLog,
    isolation: IsolationChecker,
    fail_closed: bool,
    recent_calls: Mutex<VecDeque<String>>,
}

impl GuardrailEngine {
    /// Construct an engine from its configuration and approval callback.
    pub fn new(config: GuardrailConfig, approval_callback: Arc<dyn approval::ApprovalCallback>) -> Self {
        Self {
            permission: PermissionChecker::new(config.permission),
            risk: RiskAssessor::new(config.risk),
            approval: ApprovalGate::new(config.approval, approval_callback),
            audit: AuditLog::new(config.audit_file_path, config.event_bus),
            isolation: IsolationChecker::new(config.isolation),
            fail_closed: config.fail_closed,
            recent_calls: Mutex::new(VecDeque::with_capacity(10)),
        }
    }

    fn record_recent_call(&self, tool_name: &str) -> VecDeque<String> {
        let mut recent = self.recent_calls.lock();
        let snapshot = recent.clone();
        recent.push_back(tool_name.to_string());
        if recent.len() > 10 {
            recent.pop_front();
        }
        snapshot
    }

    /// Run the full pipeline for one tool call.
    pub async fn check_tool_call(
        &self,
        tool_name: &str,
        parameters: &serde_json::Value,
        environment: Option<&str>,
        session_id: Option<&str>,
    ) -> GuardrailVerdict {
        let decision = self.permission.check(tool_name, parameters);
        let _ = self
            .audit
            .record(
                AuditEvent::new("permission_check")
                    .with_tool_name(tool_name)
                    .with_decision(if decision.allowed { "allow" } else { "deny" })
                    .with_reason(decision.reason.clone())
                    .with_context(parameters.clone(), false),
            )
            .await;

        if !decision.allowed {
            let _ = self
                .audit
                .record(
                    AuditEvent::new("tool_blocked")
                        .with_tool_name(tool_name)
                        .with_reason(decision.reason.clone()),
                )
                .await;
            return GuardrailVerdict::Block {
                reason: format!("blocked by guardrail: {}", decision.reason),
            };
        }

        let recent = self.record_recent_call(tool_name);
        let assessment = self.risk.assess(tool_name, parameters, environment, &recent);
        let _ = self
            .audit
            .record(
                AuditEvent::new("risk_assessment")
                    .with_tool_name(tool_name)
                    .with_risk_level(format!("{:?}", assessment.level))
                    .with_reason(assessment.factors.join("; ")),
            )
            .await;

        if self
            .approval
            .requires_approval(tool_name, assessment.level, assessment.score)
        {
            let request = approval::ApprovalRequest {
                request_id: uuid::Uuid::new_v4().to_string(),
                tool_name: tool_name.to_string(),
                parameters: parameters.clone(),
                risk_level: assessment.level,
                risk_score: assessment.score,
                session_id: session_id.map(str::to_string),
                reason: format!("{:?} mode", assessment.level),
            };
            let _ = self
                .audit
                .record(
                    AuditEvent::new("approval_requested")
                        .with_tool_name(tool_name)
                        .with_risk_level(format!("{:?}", assessment.level)),
                )
                .await;

            let response = self.approval.decide(request).await;
            let _ = self
                .audit
                .record(AuditEvent::new("approval_result").with_tool_name(tool_name).with_decision(
                    match response {
                        ApprovalResponse::Approved => "approved",
                        ApprovalResponse::Denied => "denied",
                    },
                ))
                .await;

            if response == ApprovalResponse::Denied {
                let _ = self
                    .audit
                    .record(
                        AuditEvent::new("tool_blocked")
                            .with_tool_name(tool_name)
                            .with_reason("approval denied or timed out"),
                    )
                    .await;
                return GuardrailVerdict::Block {
                    reason: format!("approval denied for tool '{tool_name}'"),
                };
            }
        }

        let _ = self
            .audit
            .record(AuditEvent::new("tool_executed").with_tool_name(tool_name))
            .await;
        GuardrailVerdict::Allow
    }

    /// Standalone data-isolation check for a sensitive memory operation.
    pub async fn check_memory_access(&self, key: &str, cross_session: bool) -> GuardrailVerdict {
        let decision = self.isolation.check(key, cross_session);
        let _ = self
            .audit
            .record(
                AuditEvent::new("data_isolation_check")
                    .with_decision(if decision.allowed { "allow" } else { "deny" })
                    .with_reason(decision.reason.clone()),
            )
            .await;
        if decision.allowed {
            GuardrailVerdict::Allow
        } else {
            GuardrailVerdict::Block {
                reason: decision.reason,
            }
        }
    }

    /// Whether internal pipeline errors should deny (used by callers that
    /// catch a panic/error from a stage and need to apply `fail_closed`).
    pub fn fail_closed(&self) -> bool {
        self.fail_closed
    }

    /// Snapshot of the in-memory audit ring buffer.
    pub fn audit_snapshot(&self) -> Vec<AuditEvent> {
        self.audit.ring_snapshot()
    }
}
