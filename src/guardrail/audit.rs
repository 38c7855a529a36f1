//! Audit trail: the guardrail pipeline's fourth stage.
//!
//! Every pipeline outcome produces an [`AuditEvent`] routed to an in-memory
//! ring buffer, optionally a newline-JSON file, and optionally the event
//! bus. Sensitive parameter values are redacted by regex unless a caller
//! explicitly opts a field into plaintext.

use crate::error::{GraphError, GraphResult};
use crate::events::{Event, EventBus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event kind, e.g. `permission_check`, `risk_assessment`,
    /// `approval_requested`, `approval_result`, `tool_blocked`, `tool_executed`.
    pub event_type: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Tool the event concerns, if any.
    pub tool_name: Option<String>,
    /// `allow` / `deny` / `approved` / `denied`, etc.
    pub decision: Option<String>,
    /// Human-readable reason.
    pub reason: Option<String>,
    /// Risk classification, if assessed.
    pub risk_level: Option<String>,
    /// Who/what initiated the call.
    pub actor: Option<String>,
    /// Session this event belongs to.
    pub session_id: Option<String>,
    /// Agent this event belongs to.
    pub agent_id: Option<String>,
    /// Execution/run id.
    pub execution_id: Option<String>,
    /// Node id, if applicable.
    pub node_id: Option<String>,
    /// Free-form context, e.g. redacted parameters.
    pub context: serde_json::Value,
    /// Duration of the guarded operation, if measured.
    pub duration_ms: Option<u64>,
    /// Additional metadata.
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    /// Start building an event of the given type.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            tool_name: None,
            decision: None,
            reason: None,
            risk_level: None,
            actor: None,
            session_id: None,
            agent_id: None,
            execution_id: None,
            node_id: None,
            context: serde_json::Value::Null,
            duration_ms: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Set the tool name.
    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Set the decision.
    pub fn with_decision(mut self, decision: impl Into<String>) -> Self {
        self.decision = Some(decision.into());
        self
    }

    /// Set the reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the risk level.
    pub fn with_risk_level(mut self, risk_level: impl Into<String>) -> Self {
        self.risk_level = Some(risk_level.into());
        self
    }

    /// Set the session id.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the context, redacting sensitive fields unless `plaintext` is true.
    pub fn with_context(mut self, context: serde_json::Value, plaintext: bool) -> Self {
        self.context = if plaintext { context } else { redact(&context) };
        self
    }
}

fn sensitive_field_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(password|secret|token|api[_-]?key|credential)").expect("valid regex")
    })
}

/// Redact values of any object key matching the sensitive-field pattern.
pub fn redact(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(k, v)| {
                    if sensitive_field_pattern().is_match(k) {
                        (k.clone(), serde_json::Value::String("[REDACTED]".to_string()))
                    } else {
                        (k.clone(), redact(v))
                    }
                })
                .collect();
            serde_json::Value::Object(redacted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact).collect())
        }
        other => other.clone(),
    }
}

/// Fixed-capacity circular buffer; overflow drops the oldest entry.
struct RingBuffer {
    capacity: usize,
    entries: VecDeque<AuditEvent>,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, event: AuditEvent) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }
}

/// The audit sink: ring buffer plus optional file and event-bus fanout.
pub struct AuditLog {
    ring: Mutex<RingBuffer>,
    file_path: Option<PathBuf>,
    file_lock: AsyncMutex<()>,
    event_bus: Option<EventBus>,
}

impl AuditLog {
    /// Construct a log with the default ring capacity (10,000, per spec §4.4).
    pub fn new(file_path: Option<PathBuf>, event_bus: Option<EventBus>) -> Self {
        Self {
            ring: Mutex::new(RingBuffer::new(10_000)),
            file_path,
            file_lock: AsyncMutex::new(()),
            event_bus,
        }
    }

    /// Record an event: push to the ring buffer, optionally append to the
    /// file, optionally publish on the event bus.
    pub async fn record(&self, event: AuditEvent) -> GraphResult<()> {
        self.ring.lock().push(event.clone());

        if let Some(bus) = &self.event_bus {
            let payload = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
            bus.publish(Event::new("audit", payload));
        }

        if let Some(path) = &self.file_path {
            let _guard = self.file_lock.lock().await;
            let mut line = serde_json::to_string(&event)
                .map_err(|e| GraphError::storage_error(format!("serializing audit event: {e}")))?;
            line.push('\n');

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| GraphError::storage_error(format!("creating audit dir: {e}")))?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .await
                .map_err(|e| GraphError::storage_error(format!("opening audit log: {e}")))?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| GraphError::storage_error(format!("writing audit log: {e}")))?;
        }
        Ok(())
    }

    /// Snapshot of the in-memory ring buffer, oldest first.
    pub fn ring_snapshot(&self) -> Vec<AuditEvent> {
        self.ring.lock().entries.iter().cloned().collect()
    }
}
