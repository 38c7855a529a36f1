//! The runtime executor: drives a [`GraphSpec`] run step by step (§4.2),
//! composing LLM turns (§4.3) through the guardrail pipeline (§4.4),
//! recording every step to the trace recorder (§4.6) and episodic memory
//! (§4.7), and publishing lifecycle events (§4.8).
//!
//! [`Executor::start`] begins a fresh run; [`Executor::resume`] continues one
//! that was previously paused at a `pause_node` and persisted via
//! [`crate::session::SessionStore`].

mod turn;

use crate::edge::EdgeSpec;
use crate::episodic::writer::{EpisodeIdentity, EpisodeWriter};
use crate::error::{GraphError, GraphResult};
use crate::events::{Event, EventBus};
use crate::graph::GraphSpec;
use crate::guardrail::GuardrailEngine;
use crate::llm::LLMProvider;
use crate::memory::SharedMemory;
use crate::node::{NodeContext, NodeRegistry, NodeSpec};
use crate::session::{SessionResult, SessionState, SessionStatus, SessionStore};
use crate::tools::{ToolExecutor, ToolRegistry};
use crate::trace::{ExecutionTraceRecorder, NodeExecutionRecord, TraceConfig};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag, checked at the suspension points named in
/// the concurrency model (§5): LLM requests, tool dispatch, persistence
/// writes, and retry backoff sleeps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Construct a flag that starts uncancelled.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Request cancellation; observed at the next suspension point.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Exponential backoff with full jitter applied between retry attempts
/// (base 1s, cap 30s per §4.2).
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay before jitter.
    pub base: Duration,
    /// Maximum delay, regardless of attempt count.
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let exp_ms = (self.base.as_millis() as u64).saturating_mul(1u64 << shift);
        let capped_ms = exp_ms.min(self.cap.as_millis() as u64);
        let jitter_ms = if capped_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=capped_ms)
        };
        Duration::from_millis(jitter_ms)
    }
}

/// What a node's single execution attempt produced, before edge selection.
struct NodeAttemptOutcome {
    success: bool,
    outputs: serde_json::Map<String, Value>,
    tokens: Option<u64>,
    latency_ms: u64,
}

/// How a run concluded or suspended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The run reached a terminal node (or was cancelled) and finished.
    Finished {
        /// The session this run belongs to.
        session_id: String,
        /// The final result.
        result: SessionResult,
    },
    /// The run suspended at a pause node; resumable via [`Executor::resume`].
    Paused {
        /// The session this run belongs to.
        session_id: String,
        /// The node the run paused at.
        node_id: String,
    },
}

/// Which selection a node's outgoing edges yielded, including the §4.2
/// step 11 back-edge visit-cap preference.
enum EdgeSelection<'a> {
    Selected(&'a EdgeSpec, Value),
    None,
    LoopBoundExceeded,
}

/// Drives a [`GraphSpec`] run, dispatching nodes to registered handlers or
/// LLM turns, evaluating edges, and persisting/recording along the way.
pub struct Executor {
    agent_id: String,
    node_registry: Arc<NodeRegistry>,
    llm_provider: Arc<dyn LLMProvider>,
    tool_registry: Arc<ToolRegistry>,
    tool_executor: Arc<ToolExecutor>,
    guardrail: Arc<GuardrailEngine>,
    event_bus: EventBus,
    episode_writer: Arc<EpisodeWriter>,
    session_store: SessionStore,
    backoff: BackoffPolicy,
}

impl Executor {
    /// Construct an executor from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: impl Into<String>,
        node_registry: Arc<NodeRegistry>,
        llm_provider: Arc<dyn LLMProvider>,
        tool_registry: Arc<ToolRegistry>,
        guardrail: Arc<GuardrailEngine>,
        event_bus: EventBus,
        episode_writer: Arc<EpisodeWriter>,
        session_store: SessionStore,
    ) -> Self {
        let tool_executor = Arc::new(ToolExecutor::new(tool_registry.clone()));
        Self {
            agent_id: agent_id.into(),
            node_registry,
            llm_provider,
            tool_registry,
            tool_executor,
            guardrail,
            event_bus,
            episode_writer,
            session_store,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Override the default retry backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Begin a fresh run at `entry_point` (or the graph's default entry
    /// node, if `None`). Refuses to start on an invalid spec (§7:
    /// `InvalidSpec` is fatal pre-run).
    pub async fn start(
        &self,
        graph: &GraphSpec,
        entry_point: Option<&str>,
        cancel: CancelFlag,
    ) -> GraphResult<RunOutcome> {
        graph.validate()?;
        let now = chrono::Utc::now();
        let mut state = SessionState::new(graph.goal_id.clone(), now);
        let entry = graph.resolve_entry(entry_point)?.clone();
        state.current_node_id = Some(entry);

        let memory = SharedMemory::new();
        let run_id = uuid::Uuid::new_v4().to_string();
        let trace = ExecutionTraceRecorder::new(run_id, state.session_id.clone(), TraceConfig::default());
        trace.start_run();

        self.drive(graph, memory, state, trace, cancel).await
    }

    /// Resume a previously paused session, restoring its memory snapshot
    /// and continuing from `current_node_id`. Refuses to resume against an
    /// invalid spec, same as [`Self::start`].
    pub async fn resume(&self, graph: &GraphSpec, session_id: &str, cancel: CancelFlag) -> GraphResult<RunOutcome> {
        graph.validate()?;
        let mut state = self.session_store.load(session_id).await?;
        if state.current_node_id.is_none() {
            return Err(GraphError::graph_structure(format!(
                "session '{session_id}' has no current node to resume from"
            )));
        }
        state.status = SessionStatus::Active;

        let memory = SharedMemory::new();
        memory.restore(state.memory_snapshot.clone());

        let run_id = uuid::Uuid::new_v4().to_string();
        let trace = ExecutionTraceRecorder::new(run_id, state.session_id.clone(), TraceConfig::default());
        trace.start_run();

        self.drive(graph, memory, state, trace, cancel).await
    }

    async fn drive(
        &self,
        graph: &GraphSpec,
        memory: SharedMemory,
        mut state: SessionState,
        trace: ExecutionTraceRecorder,
        cancel: CancelFlag,
    ) -> GraphResult<RunOutcome> {
        let mut iterations: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                let result = SessionResult {
                    success: false,
                    output: Value::Null,
                    error: Some("cancelled".to_string()),
                };
                state.memory_snapshot = memory.read_all();
                state.finish(result.clone(), chrono::Utc::now());
                self.session_store.save(&state).await?;
                trace.end_run();
                return Ok(RunOutcome::Finished {
                    session_id: state.session_id,
                    result,
                });
            }

            iterations += 1;
            if graph.loop_config.max_iterations != 0 && iterations > graph.loop_config.max_iterations {
                let node_id = state.current_node_id.clone().unwrap_or_default();
                trace.end_run();
                return Err(GraphError::LoopBoundExceeded { node_id });
            }

            let node_id = state
                .current_node_id
                .clone()
                .ok_or_else(|| GraphError::graph_structure("no current node to execute"))?;
            let node = graph
                .node(&node_id)
                .ok_or_else(|| GraphError::invalid_spec(format!("undeclared node '{node_id}'")))?;

            let prior_visits = trace.visit_count(&node_id);
            if node.max_node_visits != 0 && prior_visits >= node.max_node_visits {
                trace.end_run();
                return Err(GraphError::NodeVisitLimitReached {
                    node_id: node_id.clone(),
                    limit: node.max_node_visits,
                });
            }
            let visit_count = trace.enter_node(&node_id);

            let attempt_outcome = self
                .run_node_with_retries(graph, node, &memory, &trace, &cancel, &state.session_id, visit_count)
                .await?;

            state.progress.steps_executed += 1;
            state.progress.nodes_executed.push(node_id.clone());
            state.progress.total_latency_ms += attempt_outcome.latency_ms;
            if let Some(tokens) = attempt_outcome.tokens {
                state.progress.total_tokens += tokens;
            }
            if !attempt_outcome.success {
                state.progress.nodes_with_failures.push(node_id.clone());
            }

            self.event_bus.publish(Event::new(
                "node_completed",
                serde_json::json!({"node_id": node_id, "success": attempt_outcome.success}),
            ));

            let snapshot = memory.read_all();
            let outgoing = graph.outgoing_edges(&node_id);
            match self.select_next_edge(&outgoing, attempt_outcome.success, &snapshot, graph, &trace)? {
                EdgeSelection::Selected(edge, observed) => {
                    trace.record_edge_traversal(
                        &edge.source,
                        &edge.target,
                        &edge.id,
                        condition_tag(edge),
                        observed,
                        edge.is_parallel_branch,
                        None,
                    );
                    state.current_node_id = Some(edge.target.clone());
                }
                EdgeSelection::LoopBoundExceeded => {
                    trace.end_run();
                    return Err(GraphError::LoopBoundExceeded { node_id });
                }
                EdgeSelection::None => {
                    if graph.terminal_nodes.iter().any(|t| t == &node_id) {
                        trace.end_run();
                        let result = SessionResult {
                            success: attempt_outcome.success,
                            output: Value::Object(attempt_outcome.outputs),
                            error: None,
                        };
                        state.memory_snapshot = snapshot;
                        state.finish(result.clone(), chrono::Utc::now());
                        self.session_store.save(&state).await?;
                        return Ok(RunOutcome::Finished {
                            session_id: state.session_id,
                            result,
                        });
                    } else if graph.pause_nodes.iter().any(|p| p == &node_id) {
                        state.memory_snapshot = snapshot;
                        state.pause_at(node_id.clone(), chrono::Utc::now());
                        self.session_store.save(&state).await?;
                        trace.end_run();
                        return Ok(RunOutcome::Paused {
                            session_id: state.session_id,
                            node_id,
                        });
                    } else {
                        trace.end_run();
                        return Err(GraphError::NoEligibleEdge { node_id });
                    }
                }
            }
        }
    }

    /// Runs one node to either success or exhausted retries (§4.2 steps
    /// 2-7), committing memory writes only on success and writing exactly
    /// one episode per graph-level entry — at the final exit, whether that
    /// is a success or a retry-exhausted failure, never on an attempt that
    /// is about to be retried (§4.7, §8 scenario 3).
    async fn run_node_with_retries(
        &self,
        graph: &GraphSpec,
        node: &NodeSpec,
        memory: &SharedMemory,
        trace: &ExecutionTraceRecorder,
        cancel: &CancelFlag,
        session_id: &str,
        visit_count: u32,
    ) -> GraphResult<NodeAttemptOutcome> {
        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled("run cancelled".to_string()));
            }

            let started = Instant::now();
            let inputs_snapshot = memory.read_all();
            let inputs_value = Value::Object(inputs_snapshot.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
            trace.start_node(&node.id, &inputs_value, visit_count, attempt);
            self.event_bus
                .publish(Event::new("node_started", serde_json::json!({"node_id": node.id})));

            let staging = SharedMemory::new();
            staging.restore(inputs_snapshot);
            let scoped = staging.with_permissions(node.input_keys.clone(), node.output_keys.clone());

            let invoke_result = self.invoke_node(graph, node, &scoped, attempt, session_id, cancel).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let result = match invoke_result {
                Ok(tokens_used) => {
                    self.validate_and_cleanup_outputs(graph, node, &staging, &scoped, cancel)
                        .await
                        .map(|outputs| (outputs, tokens_used))
                }
                Err(e) => Err(e),
            };

            match result {
                Ok((outputs, tokens_used)) => {
                    for (key, value) in &outputs {
                        memory.write(key, value.clone(), true)?;
                    }
                    trace.complete_node(
                        &node.id,
                        &Value::Object(outputs.clone()),
                        true,
                        None,
                        None,
                        tokens_used,
                        latency_ms,
                        None,
                    );
                    self.record_episode(graph, node, trace).await;
                    return Ok(NodeAttemptOutcome {
                        success: true,
                        outputs,
                        tokens: tokens_used,
                        latency_ms,
                    });
                }
                Err(e) => {
                    trace.complete_node(
                        &node.id,
                        &Value::Object(serde_json::Map::new()),
                        false,
                        Some(e.to_string()),
                        None,
                        None,
                        latency_ms,
                        None,
                    );

                    let retryable = node.retry_on.iter().any(|k| k == e.category()) && attempt <= node.max_retries;
                    if !retryable {
                        self.record_episode(graph, node, trace).await;
                        return Err(e);
                    }

                    let delay = self.backoff.delay_for(attempt);
                    trace.record_retry(&node.id, attempt, e.category(), delay.as_millis() as u64);
                    if cancel.is_cancelled() {
                        return Err(GraphError::Cancelled("run cancelled".to_string()));
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn invoke_node(
        &self,
        graph: &GraphSpec,
        node: &NodeSpec,
        scoped: &crate::memory::ScopedMemory,
        attempt: u32,
        session_id: &str,
        cancel: &CancelFlag,
    ) -> GraphResult<Option<u64>> {
        if node.node_type.is_llm_driven() {
            self.run_llm_turn(graph, node, scoped, session_id, cancel).await
        } else {
            let handler = self.node_registry.get(node.node_type.dispatch_key()).ok_or_else(|| {
                GraphError::invalid_spec(format!(
                    "no handler registered for node type '{}'",
                    node.node_type.dispatch_key()
                ))
            })?;
            let ctx = NodeContext::new(node.id.clone(), scoped.clone(), attempt);
            handler.invoke(&ctx).await?;
            Ok(None)
        }
    }

    /// Checks the node's output contract (§4.2 step 5), re-issuing to the
    /// cleanup LLM (§4.2.2) up to `max_validation_retries` times for
    /// LLM-driven nodes that left required keys unset.
    async fn validate_and_cleanup_outputs(
        &self,
        graph: &GraphSpec,
        node: &NodeSpec,
        staging: &SharedMemory,
        scoped: &crate::memory::ScopedMemory,
        cancel: &CancelFlag,
    ) -> GraphResult<serde_json::Map<String, Value>> {
        let mut validation_attempt = 0u32;
        loop {
            let all = staging.read_all();
            let produced: Vec<String> = node
                .output_keys
                .iter()
                .filter(|k| all.contains_key(k.as_str()))
                .cloned()
                .collect();
            let missing = node.missing_output_keys(&produced);

            if missing.is_empty() {
                let mut map = serde_json::Map::new();
                for key in &node.output_keys {
                    if let Some(value) = all.get(key) {
                        map.insert(key.clone(), value.clone());
                    }
                }
                return Ok(map);
            }

            if !node.node_type.is_llm_driven() || validation_attempt >= node.max_validation_retries {
                return Err(GraphError::OutputContractViolation {
                    node_id: node.id.clone(),
                    missing,
                });
            }
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled("run cancelled".to_string()));
            }

            validation_attempt += 1;
            self.cleanup_reissue(graph, node, scoped, &missing).await?;
        }
    }

    async fn record_episode(&self, graph: &GraphSpec, node: &NodeSpec, trace: &ExecutionTraceRecorder) {
        let full_trace = trace.get_trace();
        let Some(record): Option<&NodeExecutionRecord> = full_trace.nodes.last() else {
            return;
        };
        let identity = EpisodeIdentity {
            agent_id: self.agent_id.clone(),
            goal_id: graph.goal_id.clone(),
            run_id: full_trace.run_id.clone(),
            trace_id: full_trace.run_id.clone(),
        };
        let input_key_types: Vec<(String, &'static str)> =
            node.input_keys.iter().map(|k| (k.clone(), "value")).collect();
        self.episode_writer
            .write(&identity, record, &node.name, &input_key_types, node.system_prompt.as_deref())
            .await;
    }

    /// Selects the highest-priority eligible outgoing edge (§4.2 step 9),
    /// skipping back-edges whose target has already exhausted its
    /// `max_node_visits` in favor of the next-priority non-looping edge
    /// (§4.2 step 11).
    fn select_next_edge<'a>(
        &self,
        edges: &[&'a EdgeSpec],
        last_outcome_success: bool,
        memory: &HashMap<String, Value>,
        graph: &GraphSpec,
        trace: &ExecutionTraceRecorder,
    ) -> GraphResult<EdgeSelection<'a>> {
        let mut ordered: Vec<(usize, &EdgeSpec)> = edges.iter().enumerate().map(|(i, e)| (i, *e)).collect();
        ordered.sort_by(|(ia, a), (ib, b)| b.priority.cmp(&a.priority).then(ia.cmp(ib)));

        let mut skipped_for_visit_cap = false;
        for (_, edge) in ordered {
            let (eligible, observed) = edge.is_eligible(last_outcome_success, memory)?;
            if !eligible {
                continue;
            }
            if edge.is_back_edge() {
                if let Some(target) = graph.node(&edge.target) {
                    let visits = trace.visit_count(&edge.target);
                    if target.max_node_visits != 0 && visits >= target.max_node_visits {
                        skipped_for_visit_cap = true;
                        continue;
                    }
                }
            }
            return Ok(EdgeSelection::Selected(edge, observed));
        }

        Ok(if skipped_for_visit_cap {
            EdgeSelection::LoopBoundExceeded
        } else {
            EdgeSelection::None
        })
    }
}

fn condition_tag(edge: &EdgeSpec) -> &str {
    match &edge.condition {
        crate::edge::EdgeCondition::Always => "always",
        crate::edge::EdgeCondition::OnSuccess => "on_success",
        crate::edge::EdgeCondition::OnFailure => "on_failure",
        crate::edge::EdgeCondition::Conditional { condition_expr } => condition_expr.as_str(),
    }
}
