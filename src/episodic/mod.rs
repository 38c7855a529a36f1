//! Episodic memory: persistent, retrievable records of node executions.
//!
//! An [`Episode`] is captured per node exit by the [`writer::EpisodeWriter`],
//! persisted append-only by [`store::EpisodicMemoryStore`], and surfaced back
//! to the executor (or a judge, or the evolution pipeline) through
//! [`retriever::EpisodeRetriever`].

pub mod backend;
pub mod retriever;
pub mod store;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a node's execution concluded, for episode classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeOutcome {
    /// The node produced its full output contract on the first attempt.
    Success,
    /// The node produced some but not all of its declared outputs.
    Partial,
    /// The node failed and exhausted its retries.
    Failure,
    /// The node failed at least once but ultimately succeeded.
    Retried,
    /// The node's outcome required human or guardrail escalation.
    Escalated,
}

/// A captured record of one node's execution, suitable for similarity-based
/// retrieval. See spec §3/§4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Unique episode id.
    pub episode_id: String,
    /// Trace this episode belongs to.
    pub trace_id: String,
    /// Run this episode belongs to.
    pub run_id: String,
    /// Agent identity.
    pub agent_id: String,
    /// Goal this run pursues.
    pub goal_id: String,
    /// Node this episode was captured from.
    pub node_id: String,
    /// Node's declared name.
    pub node_name: String,
    /// Summary text used as the embedding input.
    pub context_text: String,
    /// Embedding of `context_text`, if an embedding function was configured.
    pub context_embedding: Option<Vec<f32>>,
    /// Short human-readable summary of the context.
    pub context_summary: String,
    /// What the node attempted to do.
    pub action_description: String,
    /// Structured detail of the action (e.g. the full LLM request).
    pub action_details: serde_json::Value,
    /// Tool calls made during this node's execution.
    pub tool_calls: Vec<serde_json::Value>,
    /// Classified outcome.
    pub outcome: EpisodeOutcome,
    /// Human-readable outcome description.
    pub outcome_description: String,
    /// Short summary of the result.
    pub result_summary: String,
    /// Structured result data.
    pub result_data: serde_json::Value,
    /// A judge's verdict on this episode, if one was produced.
    pub judge_verdict: Option<String>,
    /// The judge's confidence in its verdict, if produced.
    pub judge_confidence: Option<f64>,
    /// The judge's free-text feedback, if produced.
    pub judge_feedback: Option<String>,
    /// Tokens used during the node's execution.
    pub tokens_used: Option<u64>,
    /// Latency of the node's execution, in milliseconds.
    pub latency_ms: Option<u64>,
    /// Attempt number (1 for a first try, 2+ for retries).
    pub attempt: u32,
    /// When this episode was captured.
    pub timestamp: DateTime<Utc>,
}

impl Episode {
    /// Classify an outcome from a node's success flag, the presence of a
    /// verdict, and the attempt number. See spec §4.7 step 1.
    pub fn classify_outcome(success: bool, has_verdict: bool, attempt: u32) -> EpisodeOutcome {
        if !success {
            return EpisodeOutcome::Failure;
        }
        if has_verdict {
            return EpisodeOutcome::Escalated;
        }
        if attempt > 1 {
            return EpisodeOutcome::Retried;
        }
        EpisodeOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_outcome_prefers_failure_over_attempt_count() {
        assert_eq!(
            Episode::classify_outcome(false, false, 3),
            EpisodeOutcome::Failure
        );
    }

    #[test]
    fn classify_outcome_marks_retried_success() {
        assert_eq!(
            Episode::classify_outcome(true, false, 2),
            EpisodeOutcome::Retried
        );
    }

    #[test]
    fn classify_outcome_marks_first_try_success() {
        assert_eq!(
            Episode::classify_outcome(true, false, 1),
            EpisodeOutcome::Success
        );
    }
}
