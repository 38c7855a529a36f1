//! Thread-safe execution trace capture.
//!
//! The recorder owns an [`ExecutionTrace`] aggregate behind a single
//! internal lock (spec design note: "finer-grained locking is a non-goal" —
//! events are small and infrequent relative to the I/O they accompany).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Config toggles for what the recorder captures.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Capture node inputs.
    pub capture_inputs: bool,
    /// Capture node outputs.
    pub capture_outputs: bool,
    /// Capture error messages.
    pub capture_errors: bool,
    /// Capture stacktraces alongside errors.
    pub capture_stacktraces: bool,
    /// Capture edge traversal records.
    pub capture_edges: bool,
    /// Capture graph mutation records.
    pub capture_mutations: bool,
    /// Whether captured inputs/outputs retain values, or only key names
    /// (set false to log topology only, e.g. for privacy).
    pub include_values: bool,
    /// Inputs/outputs longer than this many characters are truncated, with
    /// `truncated` set on the record.
    pub max_input_output_size: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            capture_inputs: true,
            capture_outputs: true,
            capture_errors: true,
            capture_stacktraces: true,
            capture_edges: true,
            capture_mutations: true,
            include_values: true,
            max_input_output_size: 4_096,
        }
    }
}

/// A node's entry/exit boundary, paired by `node_id` + `visit_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    /// Node id.
    pub node_id: String,
    /// 1-based order this node was entered within the run.
    pub execution_order: u32,
    /// How many times this node had previously been entered at the graph
    /// level (back-edge revisits), as of this entry. Distinct from
    /// `attempt`, which counts retries within a single entry.
    pub visit_count: u32,
    /// 1-based retry attempt number within this graph-level entry (2+ means
    /// a prior attempt at this same entry failed and was retried).
    pub attempt: u32,
    /// Declared inputs at entry (subject to `include_values`/truncation).
    pub inputs: serde_json::Value,
    /// Whether `inputs` was truncated to `max_input_output_size`.
    pub inputs_truncated: bool,
    /// Outputs at exit, if the node has exited.
    pub outputs: Option<serde_json::Value>,
    /// Whether `outputs` was truncated.
    pub outputs_truncated: bool,
    /// Success flag, populated at exit.
    pub success: Option<bool>,
    /// Error message, if the node failed.
    pub error: Option<String>,
    /// Stacktrace, if captured and the node failed.
    pub stacktrace: Option<String>,
    /// Tokens consumed by this node's LLM calls, if any.
    pub tokens_used: Option<u64>,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: Option<u64>,
    /// Judge/verdict tag, if a judging step ran.
    pub verdict: Option<String>,
    /// Entry timestamp.
    pub entered_at: DateTime<Utc>,
    /// Exit timestamp, if exited.
    pub exited_at: Option<DateTime<Utc>>,
}

/// One edge traversal decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeTraversalRecord {
    /// 1-based order among all edge traversals in the run.
    pub order: u32,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Edge id traversed.
    pub edge_id: String,
    /// The condition kind, as a short tag (`always`, `on_success`, ...).
    pub condition: String,
    /// The observed condition value used to decide eligibility.
    pub observed_value: serde_json::Value,
    /// Whether this traversal was part of a parallel fan-out branch.
    pub is_parallel_branch: bool,
    /// Branch id, present when `is_parallel_branch`.
    pub branch_id: Option<String>,
    /// Timestamp.
    pub at: DateTime<Utc>,
}

/// A structural change to a running graph (for agents that rewrite their
/// own graph mid-run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMutationRecord {
    /// Kind of mutation: `add_node`, `remove_node`, `add_edge`,
    /// `remove_edge`, `change_entry_point`.
    pub kind: String,
    /// Human-readable detail (e.g. the node/edge id affected).
    pub detail: String,
    /// Timestamp.
    pub at: DateTime<Utc>,
}

/// A retried node attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRecord {
    /// Node id.
    pub node_id: String,
    /// Attempt number that failed and triggered this retry (1-based).
    pub attempt: u32,
    /// The reason the attempt failed.
    pub reason: String,
    /// Backoff applied before the retry, in milliseconds.
    pub backoff_ms: u64,
    /// Timestamp.
    pub at: DateTime<Utc>,
}

/// Aggregate summary produced when a run ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Total LLM tokens consumed across the run.
    pub total_tokens: u64,
    /// Node ids that failed at least once.
    pub failed_nodes: Vec<String>,
    /// Node ids that were retried at least once.
    pub retried_nodes: Vec<String>,
    /// Ordered list of node ids entered (the "node path").
    pub node_path: Vec<String>,
}

/// The full structured log of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Run id this trace belongs to.
    pub run_id: String,
    /// Session id this trace belongs to.
    pub session_id: String,
    /// Node entries/exits, in entry order.
    pub nodes: Vec<NodeExecutionRecord>,
    /// Edge traversals, in traversal order.
    pub edges: Vec<EdgeTraversalRecord>,
    /// Retry events.
    pub retries: Vec<RetryRecord>,
    /// Graph mutations, if any occurred.
    pub mutations: Vec<GraphMutationRecord>,
    /// Populated by `end_run`.
    pub summary: Option<RunSummary>,
}

struct Inner {
    trace: ExecutionTrace,
    visit_counts: HashMap<String, u32>,
    started_at: Option<DateTime<Utc>>,
}

/// Records [`ExecutionTrace`] events under a single internal lock; safe to
/// invoke concurrently from multiple handler tasks within one run.
#[derive(Clone)]
pub struct ExecutionTraceRecorder {
    inner: Arc<Mutex<Inner>>,
    config: TraceConfig,
}

fn truncate_value(
    value: &serde_json::Value,
    config: &TraceConfig,
) -> (serde_json::Value, bool) {
    if !config.include_values {
        if let serde_json::Value::Object(map) = value {
            let keys_only: serde_json::Map<_, _> = map
                .keys()
                .map(|k| (k.clone(), serde_json::Value::Null))
                .collect();
            return (serde_json::Value::Object(keys_only), false);
        }
        return (serde_json::Value::Null, false);
    }
    let rendered = value.to_string();
    if rendered.len() > config.max_input_output_size {
        let truncated: String = rendered.chars().take(config.max_input_output_size).collect();
        (serde_json::Value::String(truncated), true)
    } else {
        (value.clone(), false)
    }
}

impl ExecutionTraceRecorder {
    /// Create a recorder for a given run/session pair.
    pub fn new(run_id: impl Into<String>, session_id: impl Into<String>, config: TraceConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                trace: ExecutionTrace {
                    run_id: run_id.into(),
                    session_id: session_id.into(),
                    ..Default::default()
                },
                visit_counts: HashMap::new(),
                started_at: None,
            })),
            config,
        }
    }

    /// Mark the start of the run.
    pub fn start_run(&self) {
        self.inner.lock().started_at = Some(Utc::now());
    }

    /// Record a graph-level entry into `node_id` (§4.2 step 2), bumping and
    /// returning its visit count. Called once per entry reached via node
    /// selection/edge traversal — NOT once per retry attempt; retries within
    /// an entry share the same visit count and are distinguished by
    /// `attempt` on [`NodeExecutionRecord`] instead.
    pub fn enter_node(&self, node_id: &str) -> u32 {
        let mut guard = self.inner.lock();
        let counter = guard.visit_counts.entry(node_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Record one attempt boundary for a node entry, returning its execution
    /// order. `visit_count` is the graph-level entry count from
    /// [`Self::enter_node`] (shared by every retry attempt within that
    /// entry); `attempt` is the 1-based retry attempt number.
    pub fn start_node(&self, node_id: &str, inputs: &serde_json::Value, visit_count: u32, attempt: u32) -> u32 {
        let mut guard = self.inner.lock();
        let execution_order = guard.trace.nodes.len() as u32 + 1;

        let (captured_inputs, truncated) = if self.config.capture_inputs {
            truncate_value(inputs, &self.config)
        } else {
            (serde_json::Value::Null, false)
        };

        guard.trace.nodes.push(NodeExecutionRecord {
            node_id: node_id.to_string(),
            execution_order,
            visit_count,
            attempt,
            inputs: captured_inputs,
            inputs_truncated: truncated,
            outputs: None,
            outputs_truncated: false,
            success: None,
            error: None,
            stacktrace: None,
            tokens_used: None,
            latency_ms: None,
            verdict: None,
            entered_at: Utc::now(),
            exited_at: None,
        });
        execution_order
    }

    /// Record a node's exit, matched to its most recent open entry by id.
    #[allow(clippy::too_many_arguments)]
    pub fn complete_node(
        &self,
        node_id: &str,
        outputs: &serde_json::Value,
        success: bool,
        error: Option<String>,
        stacktrace: Option<String>,
        tokens_used: Option<u64>,
        latency_ms: u64,
        verdict: Option<String>,
    ) {
        let mut guard = self.inner.lock();
        let config = self.config.clone();
        if let Some(record) = guard
            .trace
            .nodes
            .iter_mut()
            .rev()
            .find(|r| r.node_id == node_id && r.exited_at.is_none())
        {
            if config.capture_outputs {
                let (captured, truncated) = truncate_value(outputs, &config);
                record.outputs = Some(captured);
                record.outputs_truncated = truncated;
            }
            record.success = Some(success);
            if config.capture_errors {
                record.error = error;
                if config.capture_stacktraces {
                    record.stacktrace = stacktrace;
                }
            }
            record.tokens_used = tokens_used;
            record.latency_ms = Some(latency_ms);
            record.verdict = verdict;
            record.exited_at = Some(Utc::now());
        }
    }

    /// Record a retry event.
    pub fn record_retry(&self, node_id: &str, attempt: u32, reason: &str, backoff_ms: u64) {
        let mut guard = self.inner.lock();
        guard.trace.retries.push(RetryRecord {
            node_id: node_id.to_string(),
            attempt,
            reason: reason.to_string(),
            backoff_ms,
            at: Utc::now(),
        });
    }

    /// Record an edge traversal.
    #[allow(clippy::too_many_arguments)]
    pub fn record_edge_traversal(
        &self,
        source: &str,
        target: &str,
        edge_id: &str,
        condition: &str,
        observed_value: serde_json::Value,
        is_parallel_branch: bool,
        branch_id: Option<String>,
    ) {
        if !self.config.capture_edges {
            return;
        }
        let mut guard = self.inner.lock();
        let order = guard.trace.edges.len() as u32 + 1;
        guard.trace.edges.push(EdgeTraversalRecord {
            order,
            source: source.to_string(),
            target: target.to_string(),
            edge_id: edge_id.to_string(),
            condition: condition.to_string(),
            observed_value,
            is_parallel_branch,
            branch_id,
            at: Utc::now(),
        });
    }

    /// Record a graph structure mutation.
    pub fn record_graph_mutation(&self, kind: &str, detail: &str) {
        if !self.config.capture_mutations {
            return;
        }
        let mut guard = self.inner.lock();
        guard.trace.mutations.push(GraphMutationRecord {
            kind: kind.to_string(),
            detail: detail.to_string(),
            at: Utc::now(),
        });
    }

    /// Finalize the run, computing the aggregate summary.
    pub fn end_run(&self) {
        let mut guard = self.inner.lock();
        let duration_ms = guard
            .started_at
            .map(|start| (Utc::now() - start).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        let total_tokens = guard.trace.nodes.iter().filter_map(|n| n.tokens_used).sum();
        let failed_nodes: Vec<String> = guard
            .trace
            .nodes
            .iter()
            .filter(|n| n.success == Some(false))
            .map(|n| n.node_id.clone())
            .collect();
        let retried_nodes: Vec<String> = {
            let mut ids: Vec<String> = guard.trace.retries.iter().map(|r| r.node_id.clone()).collect();
            ids.sort();
            ids.dedup();
            ids
        };
        let node_path = guard.trace.nodes.iter().map(|n| n.node_id.clone()).collect();

        guard.trace.summary = Some(RunSummary {
            duration_ms,
            total_tokens,
            failed_nodes,
            retried_nodes,
            node_path,
        });
    }

    /// Return a deep copy of the trace for external consumers.
    pub fn get_trace(&self) -> ExecutionTrace {
        self.inner.lock().trace.clone()
    }

    /// Visit count recorded so far for a node.
    pub fn visit_count(&self, node_id: &str) -> u32 {
        self.inner
            .lock()
            .visit_counts
            .get(node_id)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_and_exits_pair_by_node_id() {
        let recorder = ExecutionTraceRecorder::new("run1", "session1", TraceConfig::default());
        recorder.start_run();
        let visit_count = recorder.enter_node("a");
        recorder.start_node("a", &json!({"x": 1}), visit_count, 1);
        recorder.complete_node("a", &json!({"y": 2}), true, None, None, Some(10), 5, None);
        recorder.end_run();

        let trace = recorder.get_trace();
        assert_eq!(trace.nodes.len(), 1);
        assert_eq!(trace.nodes[0].node_id, "a");
        assert_eq!(trace.nodes[0].success, Some(true));
        assert!(trace.summary.is_some());
    }

    #[test]
    fn revisits_increment_visit_count() {
        let recorder = ExecutionTraceRecorder::new("run1", "session1", TraceConfig::default());
        let v1 = recorder.enter_node("a");
        recorder.start_node("a", &json!({}), v1, 1);
        recorder.complete_node("a", &json!({}), true, None, None, None, 1, None);
        let v2 = recorder.enter_node("a");
        recorder.start_node("a", &json!({}), v2, 1);
        assert_eq!(v1, 1);
        assert_eq!(v2, 2);
    }

    #[test]
    fn retry_attempts_within_one_entry_do_not_inflate_visit_count() {
        let recorder = ExecutionTraceRecorder::new("run1", "session1", TraceConfig::default());
        let visit_count = recorder.enter_node("a");
        recorder.start_node("a", &json!({}), visit_count, 1);
        recorder.complete_node("a", &json!({}), false, Some("timeout".into()), None, None, 1, None);
        recorder.record_retry("a", 1, "timeout", 50);
        recorder.start_node("a", &json!({}), visit_count, 2);
        recorder.complete_node("a", &json!({}), true, None, None, None, 1, None);

        assert_eq!(recorder.visit_count("a"), 1);
        let trace = recorder.get_trace();
        assert_eq!(trace.nodes.len(), 2);
        assert_eq!(trace.nodes[1].attempt, 2);
        assert_eq!(trace.nodes[1].visit_count, 1);
    }

    #[test]
    fn include_values_false_strips_values() {
        let config = TraceConfig {
            include_values: false,
            ..TraceConfig::default()
        };
        let recorder = ExecutionTraceRecorder::new("run1", "session1", config);
        recorder.start_node("a", &json!({"secret": "value"}), 1, 1);
        let trace = recorder.get_trace();
        assert_eq!(trace.nodes[0].inputs["secret"], serde_json::Value::Null);
    }

    #[test]
    fn get_trace_is_a_deep_copy() {
        let recorder = ExecutionTraceRecorder::new("run1", "session1", TraceConfig::default());
        recorder.start_node("a", &json!({}), 1, 1);
        let mut snapshot = recorder.get_trace();
        snapshot.nodes.clear();
        assert_eq!(recorder.get_trace().nodes.len(), 1);
    }
}
