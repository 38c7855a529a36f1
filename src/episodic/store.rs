//! The episodic-memory store: owns the append-only `episodes.jsonl` log and
//! upserts embeddings into a [`VectorBackend`] on every write.
//!
//! Per the resolved Open Question (§9), this is strictly append-only —
//! unlike a write-truncating variant seen in other sources, which would
//! destroy prior episodes on every write.

use super::backend::VectorBackend;
use super::Episode;
use crate::error::{GraphError, GraphResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Owns the episode log and its paired vector index.
pub struct EpisodicMemoryStore {
    log_path: PathBuf,
    write_lock: Mutex<()>,
    backend: Arc<dyn VectorBackend>,
}

impl EpisodicMemoryStore {
    /// Construct a store writing to `log_path` (typically `episodes.jsonl`)
    /// and indexing into `backend`.
    pub fn new(log_path: impl Into<PathBuf>, backend: Arc<dyn VectorBackend>) -> Self {
        Self {
            log_path: log_path.into(),
            write_lock: Mutex::new(()),
            backend,
        }
    }

    /// Append `episode` to the log and, if it carries an embedding, upsert
    /// it into the vector index.
    pub async fn store_episode(&self, episode: &Episode) -> GraphResult<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GraphError::storage_error(format!("creating episode log dir: {e}")))?;
        }

        let mut line = serde_json::to_string(episode)
            .map_err(|e| GraphError::storage_error(format!("serializing episode: {e}")))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.log_path)
            .await
            .map_err(|e| GraphError::storage_error(format!("opening episode log: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| GraphError::storage_error(format!("writing episode log: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| GraphError::storage_error(format!("flushing episode log: {e}")))?;

        if let Some(embedding) = &episode.context_embedding {
            let metadata = serde_json::json!({
                "node_id": episode.node_id,
                "goal_id": episode.goal_id,
                "run_id": episode.run_id,
                "outcome": episode.outcome,
            });
            self.backend
                .upsert(
                    vec![episode.episode_id.clone()],
                    vec![embedding.clone()],
                    vec![metadata],
                    vec![Some(episode.context_summary.clone())],
                )
                .await?;
        }

        Ok(())
    }

    /// Read every episode currently in the log, in append order, skipping
    /// unparseable lines.
    pub async fn read_all(&self) -> GraphResult<Vec<Episode>> {
        read_episodes(&self.log_path).await
    }

    /// The vector backend backing retrieval.
    pub fn backend(&self) -> &Arc<dyn VectorBackend> {
        &self.backend
    }
}

async fn read_episodes(path: &Path) -> GraphResult<Vec<Episode>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(Vec::new());
    }
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| GraphError::storage_error(format!("reading episode log: {e}")))?;
    Ok(contents
        .lines()
        .filter_map(|line| serde_json::from_str::<Episode>(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episodic::backend::memory::InMemoryVectorBackend;
    use crate::episodic::EpisodeOutcome;
    use chrono::Utc;

    fn episode(id: &str, embedding: Option<Vec<f32>>) -> Episode {
        Episode {
            episode_id: id.to_string(),
            trace_id: "t1".to_string(),
            run_id: "r1".to_string(),
            agent_id: "a1".to_string(),
            goal_id: "g1".to_string(),
            node_id: "n1".to_string(),
            node_name: "node-one".to_string(),
            context_text: "context".to_string(),
            context_embedding: embedding,
            context_summary: "summary".to_string(),
            action_description: "did a thing".to_string(),
            action_details: serde_json::json!({}),
            tool_calls: vec![],
            outcome: EpisodeOutcome::Success,
            outcome_description: "ok".to_string(),
            result_summary: "done".to_string(),
            result_data: serde_json::json!({}),
            judge_verdict: None,
            judge_confidence: None,
            judge_feedback: None,
            tokens_used: Some(10),
            latency_ms: Some(5),
            attempt: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn store_then_read_all_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes.jsonl");
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = EpisodicMemoryStore::new(&path, backend);

        store.store_episode(&episode("e1", None)).await.unwrap();
        store.store_episode(&episode("e2", None)).await.unwrap();

        let all = store.read_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].episode_id, "e1");
    }

    #[tokio::test]
    async fn writes_are_append_only_not_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes.jsonl");
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = EpisodicMemoryStore::new(&path, backend);

        for i in 0..5 {
            store.store_episode(&episode(&format!("e{i}"), None)).await.unwrap();
        }
        assert_eq!(store.read_all().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn embedding_is_upserted_into_the_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes.jsonl");
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = EpisodicMemoryStore::new(&path, backend.clone());

        store.store_episode(&episode("e1", Some(vec![1.0, 0.0]))).await.unwrap();
        assert_eq!(backend.count().await.unwrap(), 1);
    }
}
