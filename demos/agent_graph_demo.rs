//! Minimal end-to-end walkthrough: a two-node graph wired up with every
//! collaborator the executor needs — a mock LLM provider, an empty tool
//! registry, a permissive guardrail engine, an in-memory episodic store,
//! and a session store rooted in a temp directory.
//!
//! Run with `cargo run --bin agent_graph_demo`.

use agent_graph::edge::EdgeSpec;
use agent_graph::episodic::backend::memory::InMemoryVectorBackend;
use agent_graph::episodic::store::EpisodicMemoryStore;
use agent_graph::episodic::writer::EpisodeWriter;
use agent_graph::events::EventBus;
use agent_graph::graph::{GraphSpec, LoopConfig};
use agent_graph::guardrail::approval::{ApprovalPolicy, AutoApprove};
use agent_graph::guardrail::isolation::IsolationPolicy;
use agent_graph::guardrail::permission::PermissionPolicy;
use agent_graph::guardrail::risk::RiskPolicy;
use agent_graph::guardrail::{GuardrailConfig, GuardrailEngine};
use agent_graph::llm::providers::MockProvider;
use agent_graph::node::{NodeContext, NodeHandler, NodeRegistry, NodeSpec, NodeType};
use agent_graph::tools::ToolRegistry;
use agent_graph::{CancelFlag, Executor, RunOutcome, SessionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Writes a greeting into memory; the second node reads it back and shouts it.
#[derive(Debug)]
struct Greet;

#[async_trait]
impl NodeHandler for Greet {
    async fn invoke(&self, ctx: &NodeContext) -> agent_graph::GraphResult<()> {
        ctx.memory.write("greeting", serde_json::json!("hello from agent_graph"))
    }
}

#[derive(Debug)]
struct Shout;

#[async_trait]
impl NodeHandler for Shout {
    async fn invoke(&self, ctx: &NodeContext) -> agent_graph::GraphResult<()> {
        let greeting = ctx.memory.read("greeting").and_then(|v| v.as_str().map(str::to_string));
        let shouted = greeting.unwrap_or_default().to_uppercase();
        ctx.memory.write("shouted", serde_json::json!(shouted))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    agent_graph::init_tracing();

    let mut registry = NodeRegistry::new();
    registry.register("function", Greet)?;
    registry.register("shout", Shout)?;

    let greet = NodeSpec::new("greet", "Greet", NodeType::Function).with_output_keys(["greeting"]);
    let mut shout = NodeSpec::new("shout", "Shout", NodeType::Custom(agent_graph::node::CustomNodeType("shout".into())));
    shout.input_keys = vec!["greeting".to_string()];
    shout.output_keys = vec!["shouted".to_string()];

    let graph = GraphSpec {
        id: "demo".into(),
        goal_id: "demo-goal".into(),
        version: 1,
        nodes: vec![greet, shout],
        edges: vec![EdgeSpec::on_success("greet-to-shout", "greet", "shout")],
        entry_node: "greet".into(),
        terminal_nodes: vec!["shout".into()],
        pause_nodes: Vec::new(),
        entry_points: HashMap::new(),
        loop_config: LoopConfig::default(),
        default_model: "mock-default".into(),
        max_tokens: 1024,
        cleanup_llm_model: "mock-cleanup".into(),
    };
    graph.validate()?;

    let run_dir = std::env::temp_dir().join(format!("agent-graph-demo-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&run_dir)?;
    let episodic_store = Arc::new(EpisodicMemoryStore::new(
        run_dir.join("episodes.jsonl"),
        Arc::new(InMemoryVectorBackend::new()),
    ));
    let episode_writer = Arc::new(EpisodeWriter::new(episodic_store, None));

    let guardrail = Arc::new(GuardrailEngine::new(
        GuardrailConfig {
            permission: PermissionPolicy {
                default_allowed: true,
                ..Default::default()
            },
            risk: RiskPolicy::default(),
            approval: ApprovalPolicy::default(),
            isolation: IsolationPolicy::default(),
            audit_file_path: None,
            event_bus: None,
            fail_closed: true,
        },
        Arc::new(AutoApprove),
    ));

    let executor = Executor::new(
        "demo-agent",
        Arc::new(registry),
        Arc::new(MockProvider::new()),
        Arc::new(ToolRegistry::new()),
        guardrail,
        EventBus::new(),
        episode_writer,
        SessionStore::new(run_dir.as_path()),
    );

    let outcome = executor.start(&graph, None, CancelFlag::new()).await?;
    match outcome {
        RunOutcome::Finished { session_id, result } => {
            println!("session {session_id} finished: success={}", result.success);
            println!("output: {}", result.output);
        }
        RunOutcome::Paused { session_id, node_id } => {
            println!("session {session_id} paused at {node_id}");
        }
    }

    Ok(())
}
