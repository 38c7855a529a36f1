//! Declarative edge specifications and the restricted condition evaluator.

pub mod eval;

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The guard that determines whether an edge is eligible after its source
/// node exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Always eligible.
    Always,
    /// Eligible iff the source node's last outcome was a success.
    OnSuccess,
    /// Eligible iff the source node's last outcome was a failure.
    OnFailure,
    /// Eligible iff `condition_expr` evaluates truthy against shared memory.
    Conditional {
        /// Restricted boolean expression; see [`eval::evaluate`].
        condition_expr: String,
    },
}

/// A guarded transition between two nodes, evaluated after the source
/// node's exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Unique within the owning graph.
    pub id: String,
    /// Source node id.
    pub source: NodeId,
    /// Target node id.
    pub target: NodeId,
    /// Eligibility guard.
    pub condition: EdgeCondition,
    /// Breaks ties among simultaneously-eligible edges from the same
    /// source; higher wins. Ties fall back to declaration order. Negative
    /// priorities mark back-edges for loop-bound handling (§4.2 step 11).
    pub priority: i32,
    /// Whether this edge is part of a fan-out step producing parallel
    /// branches that the executor joins before evaluating downstream edges.
    pub is_parallel_branch: bool,
}

impl EdgeSpec {
    /// Construct an always-eligible edge.
    pub fn always<S: Into<String>>(id: S, source: S, target: S) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            condition: EdgeCondition::Always,
            priority: 0,
            is_parallel_branch: false,
        }
    }

    /// Construct an on-success edge.
    pub fn on_success<S: Into<String>>(id: S, source: S, target: S) -> Self {
        Self {
            condition: EdgeCondition::OnSuccess,
            ..Self::always(id, source, target)
        }
    }

    /// Construct an on-failure edge.
    pub fn on_failure<S: Into<String>>(id: S, source: S, target: S) -> Self {
        Self {
            condition: EdgeCondition::OnFailure,
            ..Self::always(id, source, target)
        }
    }

    /// Construct a conditional edge guarded by a restricted expression.
    pub fn conditional<S: Into<String>>(id: S, source: S, target: S, condition_expr: S) -> Self {
        Self {
            condition: EdgeCondition::Conditional {
                condition_expr: condition_expr.into(),
            },
            ..Self::always(id, source, target)
        }
    }

    /// Set the priority, returning `self` for chained construction.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Mark this edge as a parallel-fan-out branch.
    pub fn as_parallel_branch(mut self) -> Self {
        self.is_parallel_branch = true;
        self
    }

    /// Whether this edge is a back-edge subject to loop-bound preference
    /// rules (negative priority, per spec §4.2 step 11).
    pub fn is_back_edge(&self) -> bool {
        self.priority < 0
    }

    /// Evaluate eligibility for this edge given the source node's last
    /// outcome and the current memory snapshot. Returns the observed
    /// condition value alongside the verdict for trace recording.
    pub fn is_eligible(
        &self,
        last_outcome_success: bool,
        memory: &HashMap<String, serde_json::Value>,
    ) -> crate::error::GraphResult<(bool, serde_json::Value)> {
        match &self.condition {
            EdgeCondition::Always => Ok((true, serde_json::Value::Bool(true))),
            EdgeCondition::OnSuccess => Ok((
                last_outcome_success,
                serde_json::Value::Bool(last_outcome_success),
            )),
            EdgeCondition::OnFailure => Ok((
                !last_outcome_success,
                serde_json::Value::Bool(!last_outcome_success),
            )),
            EdgeCondition::Conditional { condition_expr } => {
                let verdict = eval::evaluate(condition_expr, memory)?;
                Ok((verdict, serde_json::Value::Bool(verdict)))
            }
        }
    }
}

/// Select the highest-priority eligible edge among a source node's outgoing
/// edges, breaking ties by declaration order (their position in the input
/// slice).
pub fn select_edge<'a>(
    edges: &'a [EdgeSpec],
    last_outcome_success: bool,
    memory: &HashMap<String, serde_json::Value>,
) -> crate::error::GraphResult<Option<(&'a EdgeSpec, serde_json::Value)>> {
    let mut ordered: Vec<(usize, &EdgeSpec)> = edges.iter().enumerate().collect();
    ordered.sort_by(|(ia, a), (ib, b)| b.priority.cmp(&a.priority).then(ia.cmp(ib)));

    for (_, edge) in ordered {
        let (eligible, observed) = edge.is_eligible(last_outcome_success, memory)?;
        if eligible {
            return Ok(Some((edge, observed)));
        }
    }
    Ok(None)
}
