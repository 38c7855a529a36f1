//! The declarative [`GraphSpec`]: a validated, flat arena of nodes and edges.

use crate::edge::EdgeSpec;
use crate::error::{GraphError, GraphResult};
use crate::node::{NodeId, NodeSpec};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Global loop-safety configuration for a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Maximum total steps executed across the whole run, independent of
    /// any single node's `max_node_visits`.
    pub max_iterations: u32,
    /// Conversation-history trimming threshold, in tokens, applied before
    /// each LLM turn.
    pub max_history_tokens: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            max_history_tokens: 32_000,
        }
    }
}

/// A validated graph: nodes and edges in a flat arena, referenced by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    /// Unique id for this graph definition.
    pub id: String,
    /// The [`crate::goal::Goal`] this graph pursues.
    pub goal_id: String,
    /// Monotonic version, bumped on structural mutation.
    pub version: u32,

    /// All declared nodes, keyed by id for O(1) lookup alongside the
    /// ordered `Vec` used for declaration-order tie-breaks.
    pub nodes: Vec<NodeSpec>,
    /// All declared edges.
    pub edges: Vec<EdgeSpec>,

    /// The node a fresh run begins at.
    pub entry_node: NodeId,
    /// Nodes whose exit, with no eligible outgoing edge, ends the run
    /// successfully (per their outcome) rather than raising `NoEligibleEdge`.
    pub terminal_nodes: Vec<NodeId>,
    /// Nodes whose exit, with no eligible outgoing edge, pauses the run
    /// instead of failing it.
    pub pause_nodes: Vec<NodeId>,
    /// Named aliases for alternate entry points, used when resuming or when
    /// a caller requests a non-default start.
    pub entry_points: HashMap<String, NodeId>,

    /// Loop-safety configuration.
    pub loop_config: LoopConfig,
    /// Default model id used by nodes that don't override it.
    pub default_model: String,
    /// Default max-tokens used by nodes that don't override it.
    pub max_tokens: u32,
    /// Model used for cleanup re-issue requests (§4.2.2).
    pub cleanup_llm_model: String,
}

/// A non-fatal structural observation surfaced alongside successful
/// validation (dead-end warnings, per spec §3 invariant 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphWarning {
    /// Node the warning concerns.
    pub node_id: NodeId,
    /// Human-readable detail.
    pub message: String,
}

impl GraphSpec {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edges for a node, in declaration order.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&EdgeSpec> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    /// Resolve a named entry point, falling back to `entry_node` when `name`
    /// is `None`.
    pub fn resolve_entry(&self, name: Option<&str>) -> GraphResult<&NodeId> {
        match name {
            None => Ok(&self.entry_node),
            Some(name) => self
                .entry_points
                .get(name)
                .ok_or_else(|| GraphError::invalid_spec(format!("unknown entry point '{name}'"))),
        }
    }

    /// Validate structural invariants (spec §3):
    /// 1. `entry_node` and every `terminal_nodes`/`pause_nodes` member is declared.
    /// 2. Every edge's source and target is declared.
    /// 3. No duplicate node ids.
    /// 4. Every non-terminal node has at least one outgoing edge (else a
    ///    dead-end warning, not a hard failure).
    pub fn validate(&self) -> GraphResult<Vec<GraphWarning>> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.clone()) {
                return Err(GraphError::invalid_spec(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        let declared: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();

        if !declared.contains(self.entry_node.as_str()) {
            return Err(GraphError::invalid_spec(format!(
                "entry_node '{}' is not a declared node",
                self.entry_node
            )));
        }
        for id in self.terminal_nodes.iter().chain(self.pause_nodes.iter()) {
            if !declared.contains(id.as_str()) {
                return Err(GraphError::invalid_spec(format!(
                    "'{id}' listed as terminal/pause node is not declared"
                )));
            }
        }
        for (alias, target) in &self.entry_points {
            if !declared.contains(target.as_str()) {
                return Err(GraphError::invalid_spec(format!(
                    "entry point alias '{alias}' targets undeclared node '{target}'"
                )));
            }
        }
        for edge in &self.edges {
            if !declared.contains(edge.source.as_str()) {
                return Err(GraphError::invalid_spec(format!(
                    "edge '{}' has undeclared source '{}'",
                    edge.id, edge.source
                )));
            }
            if !declared.contains(edge.target.as_str()) {
                return Err(GraphError::invalid_spec(format!(
                    "edge '{}' has undeclared target '{}'",
                    edge.id, edge.target
                )));
            }
        }

        let terminal: HashSet<&str> = self.terminal_nodes.iter().map(String::as_str).collect();
        let mut warnings = Vec::new();
        for node in &self.nodes {
            if terminal.contains(node.id.as_str()) {
                continue;
            }
            if self.outgoing_edges(&node.id).is_empty() {
                warnings.push(GraphWarning {
                    node_id: node.id.clone(),
                    message: format!(
                        "node '{}' is non-terminal but has no outgoing edges",
                        node.id
                    ),
                });
            }
        }
        Ok(warnings)
    }
}
