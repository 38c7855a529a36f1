//! # AgentGraph
//!
//! A declarative graph-execution engine for autonomous multi-step agents.
//!
//! An agent's behavior is a [`graph::GraphSpec`] of [`node::NodeSpec`]s
//! connected by [`edge::EdgeSpec`]s; the [`executor::Executor`] drives the
//! graph step by step, invoking an [`llm::LLMProvider`], dispatching tool
//! calls through the [`tools`] registry and the [`guardrail`] pipeline,
//! persisting resumable [`session`] state, recording a structured
//! [`trace`], and capturing [`episodic`] memory for later retrieval.
//!
//! ## Quick start
//!
//! ```rust
//! use agent_graph::edge::EdgeSpec;
//! use agent_graph::graph::{GraphSpec, LoopConfig};
//! use agent_graph::node::{NodeSpec, NodeType};
//! use std::collections::HashMap;
//!
//! let entry = NodeSpec::new("start", "Start", NodeType::Function)
//!     .with_output_keys(["greeting"]);
//!
//! let graph = GraphSpec {
//!     id: "demo".into(),
//!     goal_id: "demo-goal".into(),
//!     version: 1,
//!     nodes: vec![entry],
//!     edges: Vec::<EdgeSpec>::new(),
//!     entry_node: "start".into(),
//!     terminal_nodes: vec!["start".into()],
//!     pause_nodes: Vec::new(),
//!     entry_points: HashMap::new(),
//!     loop_config: LoopConfig::default(),
//!     default_model: "mock-default".into(),
//!     max_tokens: 1024,
//!     cleanup_llm_model: "mock-cleanup".into(),
//! };
//!
//! assert!(graph.validate().unwrap().is_empty());
//! ```

#![warn(clippy::all)]

/// Process-wide runtime configuration.
pub mod config;
/// The declarative edge model and the restricted condition-expression evaluator.
pub mod edge;
/// Persistent episodes and their vector-backed retrieval.
pub mod episodic;
/// The stable, wire-visible error taxonomy.
pub mod error;
/// Minimal publish/subscribe event bus.
pub mod events;
/// The runtime executor: the step loop, LLM turns, retries, and edge evaluation.
pub mod executor;
/// Declarative run goals.
pub mod goal;
/// The validated node/edge arena a run is compiled from.
pub mod graph;
/// The permission, risk, approval, audit, and data-isolation pipeline.
pub mod guardrail;
/// The language-model provider contract and its deterministic mock.
pub mod llm;
/// Shared, process-local working memory and its scoped views.
pub mod memory;
/// Declarative node specifications and the handler registry.
pub mod node;
/// Resumable session state and the append-only conversation log.
pub mod session;
/// The tool registry and guardrail-wrapped dispatch layer.
pub mod tools;
/// The thread-safe execution-trace recorder.
pub mod trace;

pub use edge::{EdgeCondition, EdgeSpec};
pub use error::{GraphError, GraphResult};
pub use executor::{CancelFlag, Executor, RunOutcome};
pub use goal::Goal;
pub use graph::{GraphSpec, LoopConfig};
pub use guardrail::{GuardrailConfig, GuardrailEngine, GuardrailVerdict};
pub use memory::{ScopedMemory, SharedMemory};
pub use node::{NodeContext, NodeHandler, NodeRegistry, NodeSpec, NodeType};
pub use session::{SessionState, SessionStatus, SessionStore};
pub use trace::{ExecutionTrace, ExecutionTraceRecorder};

/// Crate version, as recorded in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the crate's tracing subscriber from `RUST_LOG`, for binaries
/// embedding the runtime. Libraries should leave subscriber setup to their
/// caller; this is provided for the demo binary and examples.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
