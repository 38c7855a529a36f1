//! Local persistent vector backend: vectors and sidecar metadata on disk,
//! loaded on init. Intended for developer workstations, not a distributed
//! deployment.

use super::{cosine_similarity, QueryMatch, VectorBackend};
use crate::error::{GraphError, GraphResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    embedding: Vec<f32>,
    metadata: Value,
    document: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OnDiskIndex {
    records: HashMap<String, StoredRecord>,
}

/// A vector backend that persists its index as a single JSON file under
/// `index_path`, loaded eagerly on construction and rewritten in full on
/// every mutation.
pub struct LocalVectorBackend {
    index_path: PathBuf,
    index: RwLock<OnDiskIndex>,
}

impl LocalVectorBackend {
    /// Load (or initialize) the index at `index_path`.
    pub async fn open(index_path: impl AsRef<Path>) -> GraphResult<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        let index = if tokio::fs::try_exists(&index_path).await.unwrap_or(false) {
            let bytes = tokio::fs::read(&index_path)
                .await
                .map_err(|e| GraphError::storage_error(format!("reading vector index: {e}")))?;
            serde_json::from_slice(&bytes)
                .map_err(|e| GraphError::storage_error(format!("parsing vector index: {e}")))?
        } else {
            OnDiskIndex::default()
        };
        Ok(Self {
            index_path,
            index: RwLock::new(index),
        })
    }

    async fn persist(&self, index: &OnDiskIndex) -> GraphResult<()> {
        if let Some(parent) = self.index_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GraphError::storage_error(format!("creating vector index dir: {e}")))?;
        }
        let bytes = serde_json::to_vec(index)
            .map_err(|e| GraphError::storage_error(format!("serializing vector index: {e}")))?;
        let tmp_path = self.index_path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| GraphError::storage_error(format!("writing vector index: {e}")))?;
        tokio::fs::rename(&tmp_path, &self.index_path)
            .await
            .map_err(|e| GraphError::storage_error(format!("renaming vector index: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for LocalVectorBackend {
    async fn upsert(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<Value>,
        documents: Vec<Option<String>>,
    ) -> GraphResult<()> {
        let mut index = self.index.write().await;
        for (((id, embedding), metadata), document) in
            ids.into_iter().zip(embeddings).zip(metadatas).zip(documents)
        {
            index.records.insert(
                id,
                StoredRecord {
                    embedding,
                    metadata,
                    document,
                },
            );
        }
        self.persist(&index).await
    }

    async fn query(
        &self,
        embedding: &[f32],
        n: usize,
        r#where: Option<&Value>,
    ) -> GraphResult<Vec<QueryMatch>> {
        let index = self.index.read().await;
        let mut scored: Vec<QueryMatch> = index
            .records
            .iter()
            .filter(|(_, record)| {
                r#where.map_or(true, |filter| match (filter.as_object(), record.metadata.as_object()) {
                    (Some(f), Some(m)) => f.iter().all(|(k, v)| m.get(k).is_some_and(|mv| mv == v)),
                    _ => true,
                })
            })
            .map(|(id, record)| QueryMatch {
                id: id.clone(),
                similarity: cosine_similarity(embedding, &record.embedding),
                metadata: record.metadata.clone(),
                document: record.document.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n);
        Ok(scored)
    }

    async fn fetch(&self, ids: &[String]) -> GraphResult<Vec<QueryMatch>> {
        let index = self.index.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                index.records.get(id).map(|record| QueryMatch {
                    id: id.clone(),
                    similarity: 1.0,
                    metadata: record.metadata.clone(),
                    document: record.document.clone(),
                })
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> GraphResult<()> {
        let mut index = self.index.write().await;
        for id in ids {
            index.records.remove(id);
        }
        self.persist(&index).await
    }

    async fn count(&self) -> GraphResult<usize> {
        Ok(self.index.read().await.records.len())
    }

    async fn clear(&self) -> GraphResult<()> {
        let mut index = self.index.write().await;
        index.records.clear();
        self.persist(&index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        {
            let backend = LocalVectorBackend::open(&path).await.unwrap();
            backend
                .upsert(vec!["a".into()], vec![vec![1.0, 0.0]], vec![json!({"k": "v"})], vec![None])
                .await
                .unwrap();
        }

        let reopened = LocalVectorBackend::open(&path).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        let fetched = reopened.fetch(&["a".to_string()]).await.unwrap();
        assert_eq!(fetched[0].metadata, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn opening_a_missing_index_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let backend = LocalVectorBackend::open(&path).await.unwrap();
        assert_eq!(backend.count().await.unwrap(), 0);
    }
}
