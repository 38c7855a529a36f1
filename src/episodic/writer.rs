//! Builds and persists an [`Episode`] on every node exit.

use super::store::EpisodicMemoryStore;
use super::{Episode, EpisodeOutcome};
use crate::trace::NodeExecutionRecord;
use async_trait::async_trait;
use std::sync::Arc;

/// An embedding function contract: given text, asynchronously produce a
/// dense vector, or fail (in which case the episode is still stored, just
/// without a vector — see spec §4.7 step 3).
#[async_trait]
pub trait EmbeddingFn: Send + Sync {
    /// Embed `text`, or return an error to degrade gracefully.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// Identity of the agent/goal producing episodes, threaded through every
/// write so the writer does not need to look it up per call.
#[derive(Debug, Clone)]
pub struct EpisodeIdentity {
    /// Agent id.
    pub agent_id: String,
    /// Goal id for the current run.
    pub goal_id: String,
    /// Run id.
    pub run_id: String,
    /// Trace id (usually equal to `run_id`).
    pub trace_id: String,
}

/// Builds an [`Episode`] from a completed node record and persists it.
pub struct EpisodeWriter {
    store: Arc<EpisodicMemoryStore>,
    embedder: Option<Arc<dyn EmbeddingFn>>,
}

impl EpisodeWriter {
    /// Construct a writer over `store`, optionally embedding context text
    /// via `embedder`.
    pub fn new(store: Arc<EpisodicMemoryStore>, embedder: Option<Arc<dyn EmbeddingFn>>) -> Self {
        Self { store, embedder }
    }

    /// Build an episode from a node's completed execution record and persist
    /// it. `input_key_types` summarizes the node's declared inputs by type,
    /// not value, per spec §4.7 step 2. `system_prompt_prefix` is the last
    /// LLM system prompt's leading text, if this node drove an LLM turn.
    pub async fn write(
        &self,
        identity: &EpisodeIdentity,
        record: &NodeExecutionRecord,
        node_name: &str,
        input_key_types: &[(String, &'static str)],
        system_prompt_prefix: Option<&str>,
    ) -> Episode {
        let success = record.success.unwrap_or(false);
        let has_verdict = record.verdict.is_some();
        let outcome = Episode::classify_outcome(success, has_verdict, record.attempt);

        let input_summary = input_key_types
            .iter()
            .map(|(key, ty)| format!("{key}:{ty}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut context_text = format!(
            "agent={} goal={} node={} inputs=[{}]",
            identity.agent_id, identity.goal_id, node_name, input_summary
        );
        if let Some(prefix) = system_prompt_prefix {
            let clipped: String = prefix.chars().take(200).collect();
            context_text.push_str(&format!(" prompt_prefix=\"{clipped}\""));
        }

        let context_embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&context_text).await {
                Ok(vector) => Some(vector),
                Err(_) => None,
            },
            None => None,
        };

        let episode = Episode {
            episode_id: uuid::Uuid::new_v4().to_string(),
            trace_id: identity.trace_id.clone(),
            run_id: identity.run_id.clone(),
            agent_id: identity.agent_id.clone(),
            goal_id: identity.goal_id.clone(),
            node_id: record.node_id.clone(),
            node_name: node_name.to_string(),
            context_text: context_text.clone(),
            context_embedding,
            context_summary: context_text.chars().take(280).collect(),
            action_description: format!("executed node '{node_name}'"),
            action_details: record.outputs.clone().unwrap_or(serde_json::Value::Null),
            tool_calls: Vec::new(),
            outcome,
            outcome_description: outcome_description(outcome, record.error.as_deref()),
            result_summary: if success { "succeeded".to_string() } else { "failed".to_string() },
            result_data: record.outputs.clone().unwrap_or(serde_json::Value::Null),
            judge_verdict: record.verdict.clone(),
            judge_confidence: None,
            judge_feedback: None,
            tokens_used: record.tokens_used,
            latency_ms: record.latency_ms,
            attempt: record.attempt,
            timestamp: chrono::Utc::now(),
        };

        let _ = self.store.store_episode(&episode).await;
        episode
    }
}

fn outcome_description(outcome: EpisodeOutcome, error: Option<&str>) -> String {
    match (outcome, error) {
        (EpisodeOutcome::Failure, Some(e)) => format!("failed: {e}"),
        (EpisodeOutcome::Failure, None) => "failed".to_string(),
        (EpisodeOutcome::Retried, _) => "succeeded after retry".to_string(),
        (EpisodeOutcome::Escalated, _) => "escalated for review".to_string(),
        (EpisodeOutcome::Partial, _) => "partially completed".to_string(),
        (EpisodeOutcome::Success, _) => "succeeded".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episodic::backend::memory::InMemoryVectorBackend;
    use crate::trace::{ExecutionTraceRecorder, TraceConfig};

    struct FailingEmbedder;
    #[async_trait]
    impl EmbeddingFn for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, String> {
            Err("embedding service unavailable".to_string())
        }
    }

    struct OkEmbedder;
    #[async_trait]
    impl EmbeddingFn for OkEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, String> {
            Ok(vec![0.1, 0.2])
        }
    }

    fn identity() -> EpisodeIdentity {
        EpisodeIdentity {
            agent_id: "agent-1".to_string(),
            goal_id: "goal-1".to_string(),
            run_id: "run-1".to_string(),
            trace_id: "run-1".to_string(),
        }
    }

    async fn completed_record() -> crate::trace::NodeExecutionRecord {
        let recorder = ExecutionTraceRecorder::new("run-1", "session-1", TraceConfig::default());
        let visit_count = recorder.enter_node("n1");
        recorder.start_node("n1", &serde_json::json!({}), visit_count, 1);
        recorder.complete_node(
            "n1",
            &serde_json::json!({"y": 42}),
            true,
            None,
            None,
            Some(10),
            5,
            None,
        );
        recorder.get_trace().nodes[0].clone()
    }

    #[tokio::test]
    async fn embedding_failure_degrades_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EpisodicMemoryStore::new(
            dir.path().join("episodes.jsonl"),
            Arc::new(InMemoryVectorBackend::new()),
        ));
        let writer = EpisodeWriter::new(store.clone(), Some(Arc::new(FailingEmbedder)));

        let record = completed_record().await;
        let episode = writer.write(&identity(), &record, "node-one", &[], None).await;
        assert!(episode.context_embedding.is_none());
        assert_eq!(store.read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn successful_embedding_is_attached() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(EpisodicMemoryStore::new(
            dir.path().join("episodes.jsonl"),
            Arc::new(InMemoryVectorBackend::new()),
        ));
        let writer = EpisodeWriter::new(store, Some(Arc::new(OkEmbedder)));

        let record = completed_record().await;
        let episode = writer.write(&identity(), &record, "node-one", &[], None).await;
        assert_eq!(episode.context_embedding, Some(vec![0.1, 0.2]));
    }
}
