//! Scale and loop-safety coverage: a long chain of sequential nodes, the
//! per-node visit cap, and the graph-wide iteration cap, including the
//! back-edge visit-cap preference that prefers a non-looping alternative
//! edge over failing outright.

use agent_graph::edge::EdgeSpec;
use agent_graph::episodic::backend::memory::InMemoryVectorBackend;
use agent_graph::episodic::store::EpisodicMemoryStore;
use agent_graph::episodic::writer::EpisodeWriter;
use agent_graph::graph::{GraphSpec, LoopConfig};
use agent_graph::guardrail::approval::{ApprovalPolicy, AutoApprove};
use agent_graph::guardrail::isolation::IsolationPolicy;
use agent_graph::guardrail::permission::PermissionPolicy;
use agent_graph::guardrail::risk::RiskPolicy;
use agent_graph::guardrail::{GuardrailConfig, GuardrailEngine};
use agent_graph::llm::providers::MockProvider;
use agent_graph::node::{NodeContext, NodeHandler, NodeRegistry, NodeSpec, NodeType};
use agent_graph::tools::ToolRegistry;
use agent_graph::{CancelFlag, Executor, GraphError, RunOutcome, SessionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Increment {
    amount: i64,
}

#[async_trait]
impl NodeHandler for Increment {
    async fn invoke(&self, ctx: &NodeContext) -> agent_graph::GraphResult<()> {
        let current = ctx.memory.read("value").and_then(|v| v.as_i64()).unwrap_or(0);
        ctx.memory.write("value", serde_json::json!(current + self.amount))?;
        Ok(())
    }
}

#[derive(Debug)]
struct Noop;

#[async_trait]
impl NodeHandler for Noop {
    async fn invoke(&self, _ctx: &NodeContext) -> agent_graph::GraphResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct FlakyOnFirstEntry {
    attempts: AtomicU32,
    fail_until: u32,
}

#[async_trait]
impl NodeHandler for FlakyOnFirstEntry {
    async fn invoke(&self, _ctx: &NodeContext) -> agent_graph::GraphResult<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_until {
            return Err(GraphError::StorageError(format!("transient failure #{attempt}")));
        }
        Ok(())
    }
}

fn test_executor(tmp: &std::path::Path, registry: NodeRegistry) -> Executor {
    let guardrail = Arc::new(GuardrailEngine::new(
        GuardrailConfig {
            permission: PermissionPolicy::default(),
            risk: RiskPolicy::default(),
            approval: ApprovalPolicy::default(),
            isolation: IsolationPolicy::default(),
            audit_file_path: None,
            event_bus: None,
            fail_closed: true,
        },
        Arc::new(AutoApprove),
    ));
    let store = Arc::new(EpisodicMemoryStore::new(
        tmp.join("episodes.jsonl"),
        Arc::new(InMemoryVectorBackend::new()),
    ));
    Executor::new(
        "stress-agent",
        Arc::new(registry),
        Arc::new(MockProvider::new()),
        Arc::new(ToolRegistry::new()),
        guardrail,
        agent_graph::events::EventBus::new(),
        Arc::new(EpisodeWriter::new(store, None)),
        SessionStore::new(tmp),
    )
}

fn base_graph(nodes: Vec<NodeSpec>, edges: Vec<EdgeSpec>, entry: &str, terminal: Vec<&str>) -> GraphSpec {
    GraphSpec {
        id: "g-stress".into(),
        goal_id: "goal1".into(),
        version: 1,
        nodes,
        edges,
        entry_node: entry.into(),
        terminal_nodes: terminal.into_iter().map(String::from).collect(),
        pause_nodes: vec![],
        entry_points: HashMap::new(),
        loop_config: LoopConfig::default(),
        default_model: "mock-default".into(),
        max_tokens: 256,
        cleanup_llm_model: "mock-cleanup".into(),
    }
}

const CHAIN_LENGTH: usize = 200;

#[tokio::test]
async fn a_long_chain_of_sequential_nodes_accumulates_correctly() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry.register("function", Increment { amount: 1 }).unwrap();

    let mut nodes = Vec::with_capacity(CHAIN_LENGTH);
    let mut edges = Vec::with_capacity(CHAIN_LENGTH - 1);
    for i in 0..CHAIN_LENGTH {
        let id = format!("n{i}");
        let mut node = NodeSpec::new(id.clone(), id.clone(), NodeType::Function).with_output_keys(["value"]);
        if i > 0 {
            node = node.with_input_keys(["value"]);
            edges.push(EdgeSpec::on_success(format!("e{i}"), format!("n{}", i - 1), id.clone()));
        }
        nodes.push(node);
    }
    let last = format!("n{}", CHAIN_LENGTH - 1);
    let graph = base_graph(nodes, edges, "n0", vec![&last]);

    let executor = test_executor(dir.path(), registry);
    let outcome = executor.start(&graph, None, CancelFlag::new()).await.unwrap();
    match outcome {
        RunOutcome::Finished { result, .. } => {
            assert!(result.success);
            assert_eq!(result.output["value"], serde_json::json!(CHAIN_LENGTH as i64));
        }
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[tokio::test]
async fn exceeding_a_nodes_visit_limit_through_non_looping_edges_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry.register("function", Noop).unwrap();

    // `a` and `b` ping-pong via ordinary (non-back-edge, priority >= 0) edges,
    // so the visit cap is enforced by the top-of-loop check in the executor's
    // drive loop rather than the back-edge skip in edge selection.
    let nodes = vec![
        NodeSpec::new("a", "A", NodeType::Function).with_max_node_visits(2),
        NodeSpec::new("b", "B", NodeType::Function),
    ];
    let edges = vec![
        EdgeSpec::on_success("a_to_b", "a", "b"),
        EdgeSpec::on_success("b_to_a", "b", "a"),
    ];
    let graph = base_graph(nodes, edges, "a", vec![]);

    let executor = test_executor(dir.path(), registry);
    let err = executor.start(&graph, None, CancelFlag::new()).await.unwrap_err();
    match err {
        GraphError::NodeVisitLimitReached { node_id, limit } => {
            assert_eq!(node_id, "a");
            assert_eq!(limit, 2);
        }
        other => panic!("expected NodeVisitLimitReached, got {other:?}"),
    }
}

#[tokio::test]
async fn a_back_edge_at_its_visit_cap_is_skipped_for_a_lower_priority_exit_edge() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry.register("function", Noop).unwrap();

    // `loop` prefers looping back to itself (negative priority => back-edge)
    // but once its visit cap is hit, falls through to the lower-priority
    // `always` edge to `done` instead of failing the run.
    let nodes = vec![
        NodeSpec::new("loop", "Loop", NodeType::Function).with_max_node_visits(3),
        NodeSpec::new("done", "Done", NodeType::Function),
    ];
    let edges = vec![
        EdgeSpec::always("self", "loop", "loop").with_priority(-1),
        EdgeSpec::always("exit", "loop", "done").with_priority(-2),
    ];
    let graph = base_graph(nodes, edges, "loop", vec!["done"]);

    let executor = test_executor(dir.path(), registry);
    let outcome = executor.start(&graph, None, CancelFlag::new()).await.unwrap();
    match outcome {
        RunOutcome::Finished { result, .. } => assert!(result.success),
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[tokio::test]
async fn a_back_edge_at_its_visit_cap_with_no_alternative_edge_surfaces_loop_bound_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry.register("function", Noop).unwrap();

    let nodes = vec![NodeSpec::new("loop", "Loop", NodeType::Function).with_max_node_visits(3)];
    let edges = vec![EdgeSpec::always("self", "loop", "loop").with_priority(-1)];
    let graph = base_graph(nodes, edges, "loop", vec![]);

    let executor = test_executor(dir.path(), registry);
    let err = executor.start(&graph, None, CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, GraphError::LoopBoundExceeded { node_id } if node_id == "loop"));
}

#[tokio::test]
async fn retry_attempts_on_one_entry_do_not_count_against_the_nodes_visit_cap() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry
        .register(
            "function",
            FlakyOnFirstEntry {
                attempts: AtomicU32::new(0),
                fail_until: 2,
            },
        )
        .unwrap();

    // `loop` needs 2 retries to clear its first graph-level entry, then
    // succeeds outright on its second. A visit cap of 2 must count those as
    // two entries, not five attempts: the run should fail only when `loop`
    // is entered a third time, via the back-edge's own visit-cap skip
    // (LoopBoundExceeded), never via a premature NodeVisitLimitReached on
    // the second entry.
    let nodes = vec![NodeSpec::new("loop", "Loop", NodeType::Function)
        .with_max_node_visits(2)
        .with_retries(2, vec!["storage_error".to_string()])];
    let edges = vec![EdgeSpec::always("self", "loop", "loop").with_priority(-1)];
    let graph = base_graph(nodes, edges, "loop", vec![]);

    let executor = test_executor(dir.path(), registry);
    let err = executor.start(&graph, None, CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, GraphError::LoopBoundExceeded { node_id } if node_id == "loop"));
}

#[tokio::test]
async fn the_graph_wide_iteration_cap_trips_independent_of_any_single_nodes_visit_limit() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry.register("function", Noop).unwrap();

    // Neither node declares a `max_node_visits`, so only `loop_config.max_iterations`
    // can stop this otherwise-infinite ping-pong.
    let nodes = vec![
        NodeSpec::new("a", "A", NodeType::Function),
        NodeSpec::new("b", "B", NodeType::Function),
    ];
    let edges = vec![
        EdgeSpec::always("a_to_b", "a", "b"),
        EdgeSpec::always("b_to_a", "b", "a"),
    ];
    let mut graph = base_graph(nodes, edges, "a", vec![]);
    graph.loop_config = LoopConfig {
        max_iterations: 10,
        max_history_tokens: 32_000,
    };

    let executor = test_executor(dir.path(), registry);
    let err = executor.start(&graph, None, CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, GraphError::LoopBoundExceeded { .. }));
}
