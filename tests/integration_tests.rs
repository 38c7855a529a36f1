//! End-to-end coverage of the executor's step loop: sequential execution,
//! conditional routing, retries, validation, and pause/resume.

use agent_graph::edge::EdgeSpec;
use agent_graph::episodic::backend::memory::InMemoryVectorBackend;
use agent_graph::episodic::store::EpisodicMemoryStore;
use agent_graph::episodic::writer::EpisodeWriter;
use agent_graph::episodic::EpisodeOutcome;
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
struct FlakyThenSucceeds {
    attempts: AtomicU32,
    fail_until: u32,
}

#[async_trait]
impl NodeHandler for FlakyThenSucceeds {
    async fn invoke(&self, ctx: &NodeContext) -> agent_graph::GraphResult<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_until {
            return Err(GraphError::StorageError(format!("transient failure #{attempt}")));
        }
        ctx.memory.write("recovered", serde_json::json!(true))?;
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
        "integration-agent",
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
        id: "g1".into(),
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

#[tokio::test]
async fn sequential_function_nodes_accumulate_into_shared_memory() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry.register("function", Increment { amount: 10 }).unwrap();

    let nodes = vec![
        NodeSpec::new("a", "A", NodeType::Function).with_output_keys(["value"]),
        NodeSpec::new("b", "B", NodeType::Function)
            .with_input_keys(["value"])
            .with_output_keys(["value"]),
        NodeSpec::new("c", "C", NodeType::Function)
            .with_input_keys(["value"])
            .with_output_keys(["value"]),
    ];
    let edges = vec![
        EdgeSpec::on_success("e1", "a", "b"),
        EdgeSpec::on_success("e2", "b", "c"),
    ];
    let graph = base_graph(nodes, edges, "a", vec!["c"]);

    let executor = test_executor(dir.path(), registry);
    let outcome = executor.start(&graph, None, CancelFlag::new()).await.unwrap();
    match outcome {
        RunOutcome::Finished { result, .. } => {
            assert!(result.success);
            assert_eq!(result.output["value"], serde_json::json!(30));
        }
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[tokio::test]
async fn conditional_edge_routes_on_accumulated_value() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry.register("function", Increment { amount: 60 }).unwrap();

    let nodes = vec![
        NodeSpec::new("start", "Start", NodeType::Function).with_output_keys(["value"]),
        NodeSpec::new("high", "High", NodeType::Function)
            .with_input_keys(["value"])
            .with_output_keys(["value"]),
        NodeSpec::new("low", "Low", NodeType::Function)
            .with_input_keys(["value"])
            .with_output_keys(["value"]),
    ];
    let edges = vec![
        EdgeSpec::conditional("to_high", "start", "high", "value > 50").with_priority(1),
        EdgeSpec::always("to_low", "start", "low"),
    ];
    let graph = base_graph(nodes, edges, "start", vec!["high", "low"]);

    let executor = test_executor(dir.path(), registry);
    let outcome = executor.start(&graph, None, CancelFlag::new()).await.unwrap();
    match outcome {
        RunOutcome::Finished { result, .. } => {
            assert!(result.success);
            assert_eq!(result.output["value"], serde_json::json!(120));
        }
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[tokio::test]
async fn a_node_retries_until_it_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry
        .register(
            "flaky",
            FlakyThenSucceeds {
                attempts: AtomicU32::new(0),
                fail_until: 2,
            },
        )
        .unwrap();

    let node = NodeSpec::new(
        "a",
        "A",
        NodeType::Custom(agent_graph::node::CustomNodeType("flaky".to_string())),
    )
    .with_output_keys(["recovered"])
    .with_retries(5, vec!["storage_error".to_string()]);
    let graph = base_graph(vec![node], vec![], "a", vec!["a"]);

    let executor = test_executor(dir.path(), registry);
    let outcome = executor.start(&graph, None, CancelFlag::new()).await.unwrap();
    match outcome {
        RunOutcome::Finished { result, .. } => {
            assert!(result.success);
            assert_eq!(result.output["recovered"], serde_json::json!(true));
        }
        other => panic!("expected Finished, got {other:?}"),
    }
}

#[tokio::test]
async fn a_node_that_fails_once_then_succeeds_writes_exactly_one_retried_episode() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry
        .register(
            "flaky",
            FlakyThenSucceeds {
                attempts: AtomicU32::new(0),
                fail_until: 1,
            },
        )
        .unwrap();

    let node = NodeSpec::new(
        "a",
        "A",
        NodeType::Custom(agent_graph::node::CustomNodeType("flaky".to_string())),
    )
    .with_output_keys(["recovered"])
    .with_retries(2, vec!["storage_error".to_string()]);
    let graph = base_graph(vec![node], vec![], "a", vec!["a"]);

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
        dir.path().join("episodes.jsonl"),
        Arc::new(InMemoryVectorBackend::new()),
    ));
    let executor = Executor::new(
        "integration-agent",
        Arc::new(registry),
        Arc::new(MockProvider::new()),
        Arc::new(ToolRegistry::new()),
        guardrail,
        agent_graph::events::EventBus::new(),
        Arc::new(EpisodeWriter::new(store.clone(), None)),
        SessionStore::new(dir.path()),
    );

    let outcome = executor.start(&graph, None, CancelFlag::new()).await.unwrap();
    match outcome {
        RunOutcome::Finished { result, .. } => assert!(result.success),
        other => panic!("expected Finished, got {other:?}"),
    }

    // §8 scenario 3: one retry, final status success, exactly one episode
    // per final exit — not one per attempt.
    let episodes = store.read_all().await.unwrap();
    assert_eq!(episodes.len(), 1);
    assert_eq!(episodes[0].outcome, EpisodeOutcome::Retried);
    assert_eq!(episodes[0].attempt, 2);
}

#[tokio::test]
async fn exhausting_retries_surfaces_the_underlying_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry
        .register(
            "flaky",
            FlakyThenSucceeds {
                attempts: AtomicU32::new(0),
                fail_until: 10,
            },
        )
        .unwrap();

    let node = NodeSpec::new(
        "a",
        "A",
        NodeType::Custom(agent_graph::node::CustomNodeType("flaky".to_string())),
    )
    .with_retries(2, vec!["storage_error".to_string()]);
    let graph = base_graph(vec![node], vec![], "a", vec!["a"]);

    let executor = test_executor(dir.path(), registry);
    let err = executor.start(&graph, None, CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, GraphError::StorageError(_)));
}

#[tokio::test]
async fn graph_with_dangling_edge_target_fails_validation() {
    let nodes = vec![NodeSpec::new("a", "A", NodeType::Function)];
    let edges = vec![EdgeSpec::always("e1", "a", "ghost")];
    let graph = base_graph(nodes, edges, "a", vec!["a"]);

    let err = graph.validate().unwrap_err();
    assert!(matches!(err, GraphError::InvalidSpec(_)));
}

#[tokio::test]
async fn pausing_and_resuming_preserves_memory_across_processes() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry.register("function", Increment { amount: 7 }).unwrap();

    let nodes = vec![NodeSpec::new("a", "A", NodeType::Function)
        .with_input_keys(["value"])
        .with_output_keys(["value"])];
    let mut graph = base_graph(nodes, vec![], "a", vec![]);
    graph.pause_nodes = vec!["a".into()];

    let executor = test_executor(dir.path(), registry);
    let outcome = executor.start(&graph, None, CancelFlag::new()).await.unwrap();
    let session_id = match outcome {
        RunOutcome::Paused { session_id, node_id } => {
            assert_eq!(node_id, "a");
            session_id
        }
        other => panic!("expected Paused, got {other:?}"),
    };

    // Simulate a fresh process: a brand new executor over the same base dir.
    let mut registry2 = NodeRegistry::new();
    registry2.register("function", Increment { amount: 7 }).unwrap();
    let executor2 = test_executor(dir.path(), registry2);

    graph.pause_nodes.clear();
    graph.terminal_nodes = vec!["a".into()];
    let resumed = executor2.resume(&graph, &session_id, CancelFlag::new()).await.unwrap();
    match resumed {
        RunOutcome::Finished { result, .. } => {
            assert!(result.success);
            assert_eq!(result.output["value"], serde_json::json!(14));
        }
        other => panic!("expected Finished, got {other:?}"),
    }
}
