//! Declarative node specifications for the AgentGraph runtime.
//!
//! A [`NodeSpec`] is data, not behavior: the executor interprets `node_type`
//! and dispatches to a built-in handler (`llm_generate`, `llm_tool_use`,
//! `event_loop`) or to a handler registered in a [`NodeRegistry`] for
//! `function` nodes and custom tags.

use crate::error::{GraphError, GraphResult};
use crate::memory::ScopedMemory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Unique identifier for a node, scoped to its owning graph.
pub type NodeId = String;

/// The behavior kind of a node, dispatched by the executor's step loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A single LLM completion request; the response text becomes the node's output.
    LlmGenerate,
    /// An LLM turn that may dispatch tool calls before producing a final text response.
    LlmToolUse,
    /// A bounded tool-call/tool-result loop driven entirely by the LLM (see spec §4.3).
    EventLoop,
    /// A registered Rust handler invoked directly with a `NodeContext`.
    Function,
    /// A custom tag resolved via the node registry, for handlers outside the
    /// built-in set.
    Custom(CustomNodeType),
}

/// A custom node-type tag. Kept as a newtype (rather than a bare `String`
/// variant) so `NodeType` can still derive `Eq`/`Hash`-friendly comparisons
/// without colliding with the built-in tags during (de)serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomNodeType(pub String);

impl NodeType {
    /// The registry key under which a handler for this node type is looked up.
    pub fn dispatch_key(&self) -> &str {
        match self {
            NodeType::LlmGenerate => "llm_generate",
            NodeType::LlmToolUse => "llm_tool_use",
            NodeType::EventLoop => "event_loop",
            NodeType::Function => "function",
            NodeType::Custom(tag) => &tag.0,
        }
    }

    /// Whether this node type drives an LLM turn loop (§4.3) rather than a
    /// direct function invocation.
    pub fn is_llm_driven(&self) -> bool {
        matches!(
            self,
            NodeType::LlmGenerate | NodeType::LlmToolUse | NodeType::EventLoop
        )
    }
}

/// Error kinds (by `GraphError::category()`) eligible for `retry_on`.
pub type RetryableErrorKind = String;

/// A declarative unit of work in a [`crate::graph::GraphSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique within the owning graph.
    pub id: NodeId,
    /// Human-readable name.
    pub name: String,
    /// Longer description of intent.
    pub description: Option<String>,

    /// Dispatch kind.
    pub node_type: NodeType,

    /// Memory keys this node reads; used to construct its scoped view.
    pub input_keys: Vec<String>,
    /// Memory keys this node must produce on success.
    pub output_keys: Vec<String>,
    /// Subset of `output_keys` that may be omitted without failing the
    /// node's output contract.
    pub nullable_output_keys: Vec<String>,

    /// System prompt for LLM-driven node types.
    pub system_prompt: Option<String>,
    /// Model override; falls back to the graph's `default_model` when absent.
    pub model: Option<String>,
    /// Tool-name allowlist available to this node's turn loop.
    pub tools: Vec<String>,
    /// Max tokens requested per LLM call.
    pub max_tokens: Option<u32>,

    /// Maximum retry attempts on a recoverable failure.
    pub max_retries: u32,
    /// Error categories (see `GraphError::category()`) that trigger a retry.
    pub retry_on: Vec<RetryableErrorKind>,
    /// Maximum number of times this node may be entered across a run.
    /// `0` means unlimited (the executor still applies its own safety bound).
    pub max_node_visits: u32,
    /// Maximum re-attempts allowed when the output contract is violated.
    pub max_validation_retries: u32,
    /// Per-turn cap on tool-call/tool-result cycles (§4.3).
    pub max_tool_calls_per_turn: u32,

    /// Whether user-visible conversation turns are expected from this node.
    pub client_facing: bool,

    /// Free-form metadata, not interpreted by the executor.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NodeSpec {
    /// Start building a node with the minimum required fields.
    pub fn new<S: Into<String>>(id: S, name: S, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            node_type,
            input_keys: Vec::new(),
            output_keys: Vec::new(),
            nullable_output_keys: Vec::new(),
            system_prompt: None,
            model: None,
            tools: Vec::new(),
            max_tokens: None,
            max_retries: 0,
            retry_on: Vec::new(),
            max_node_visits: 0,
            max_validation_retries: 1,
            max_tool_calls_per_turn: 10,
            client_facing: false,
            metadata: HashMap::new(),
        }
    }

    /// Set the description.
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare required input keys.
    pub fn with_input_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Declare required (non-nullable) output keys.
    pub fn with_output_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Declare which output keys may be omitted.
    pub fn with_nullable_output_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nullable_output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the system prompt.
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the retry policy.
    pub fn with_retries(mut self, max_retries: u32, retry_on: Vec<RetryableErrorKind>) -> Self {
        self.max_retries = max_retries;
        self.retry_on = retry_on;
        self
    }

    /// Set the visit bound.
    pub fn with_max_node_visits(mut self, max_node_visits: u32) -> Self {
        self.max_node_visits = max_node_visits;
        self
    }

    /// Mark the node as client-facing.
    pub fn client_facing(mut self) -> Self {
        self.client_facing = true;
        self
    }

    /// Non-nullable output keys still required to satisfy the contract.
    pub fn required_output_keys(&self) -> impl Iterator<Item = &String> {
        self.output_keys
            .iter()
            .filter(move |k| !self.nullable_output_keys.contains(k))
    }

    /// Check a completed node's memory writes against its output contract.
    /// Returns the list of missing required keys, empty when satisfied.
    pub fn missing_output_keys(&self, produced: &[String]) -> Vec<String> {
        self.required_output_keys()
            .filter(|k| !produced.contains(k))
            .cloned()
            .collect()
    }
}

/// Carries a node's scoped memory handle and declared inputs into a
/// registered handler.
pub struct NodeContext {
    /// Node being executed.
    pub node_id: NodeId,
    /// Scoped view restricting reads/writes to the node's declared keys.
    pub memory: ScopedMemory,
    /// Current attempt number, starting at 1.
    pub attempt: u32,
}

impl NodeContext {
    /// Construct a new context.
    pub fn new(node_id: NodeId, memory: ScopedMemory, attempt: u32) -> Self {
        Self {
            node_id,
            memory,
            attempt,
        }
    }
}

/// A registered handler for `function` node types and custom tags.
///
/// Handlers read their declared inputs and write their declared outputs
/// through `ctx.memory`; the executor validates the output contract after
/// the handler returns.
#[async_trait]
pub trait NodeHandler: Send + Sync + Debug {
    /// Execute the handler against the given context.
    async fn invoke(&self, ctx: &NodeContext) -> GraphResult<()>;
}

/// Registry of handlers for `function` nodes and custom `node_type` tags,
/// keyed by [`NodeType::dispatch_key`].
#[derive(Default)]
pub struct NodeRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under a dispatch key.
    pub fn register<S, H>(&mut self, key: S, handler: H) -> GraphResult<()>
    where
        S: Into<String>,
        H: NodeHandler + 'static,
    {
        let key = key.into();
        if self.handlers.contains_key(&key) {
            return Err(GraphError::invalid_spec(format!(
                "handler for node type '{key}' already registered"
            )));
        }
        self.handlers.insert(key, Arc::new(handler));
        Ok(())
    }

    /// Look up a handler by dispatch key.
    pub fn get(&self, key: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(key).cloned()
    }

    /// Whether a handler is registered for the given key.
    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }
}
