//! In-memory vector backend: cosine similarity, non-persistent. Reference
//! implementation used for testing and for development without a real
//! vector index configured.

use super::{cosine_similarity, QueryMatch, VectorBackend};
use crate::error::GraphResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

struct Record {
    embedding: Vec<f32>,
    metadata: Value,
    document: Option<String>,
}

/// A non-persistent vector backend backed by an in-process map.
#[derive(Default)]
pub struct InMemoryVectorBackend {
    records: RwLock<HashMap<String, Record>>,
}

impl InMemoryVectorBackend {
    /// Construct an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_where(metadata: &Value, filter: &Value) -> bool {
    let (Some(filter_obj), Some(metadata_obj)) = (filter.as_object(), metadata.as_object()) else {
        return true;
    };
    filter_obj
        .iter()
        .all(|(k, v)| metadata_obj.get(k).is_some_and(|mv| mv == v))
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    async fn upsert(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<Value>,
        documents: Vec<Option<String>>,
    ) -> GraphResult<()> {
        let mut records = self.records.write();
        for (((id, embedding), metadata), document) in
            ids.into_iter().zip(embeddings).zip(metadatas).zip(documents)
        {
            records.insert(
                id,
                Record {
                    embedding,
                    metadata,
                    document,
                },
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        n: usize,
        r#where: Option<&Value>,
    ) -> GraphResult<Vec<QueryMatch>> {
        let records = self.records.read();
        let mut scored: Vec<QueryMatch> = records
            .iter()
            .filter(|(_, record)| r#where.map_or(true, |filter| matches_where(&record.metadata, filter)))
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
        let records = self.records.read();
        Ok(ids
            .iter()
            .filter_map(|id| {
                records.get(id).map(|record| QueryMatch {
                    id: id.clone(),
                    similarity: 1.0,
                    metadata: record.metadata.clone(),
                    document: record.document.clone(),
                })
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> GraphResult<()> {
        let mut records = self.records.write();
        for id in ids {
            records.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> GraphResult<usize> {
        Ok(self.records.read().len())
    }

    async fn clear(&self) -> GraphResult<()> {
        self.records.write().clear();
        Ok(())
    }
}
