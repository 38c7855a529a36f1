//! Scalable external vector backend: hands off to an external index service
//! over HTTP. The index itself (Pinecone-, Qdrant-, or Weaviate-shaped) is an
//! out-of-scope collaborator; only the contract is implemented here.

use super::{QueryMatch, VectorBackend};
use crate::error::{GraphError, GraphResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Configuration for reaching the external index.
#[derive(Debug, Clone)]
pub struct ExternalBackendConfig {
    /// Base URL of the external index service.
    pub endpoint: String,
    /// Namespace or collection name.
    pub namespace: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// A vector backend that delegates to an external HTTP index service.
pub struct ExternalVectorBackend {
    config: ExternalBackendConfig,
    client: reqwest::Client,
}

impl ExternalVectorBackend {
    /// Construct a backend pointed at `config.endpoint`.
    pub fn new(config: ExternalBackendConfig) -> GraphResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GraphError::configuration_error(format!("building http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/namespaces/{}/{}", self.config.endpoint, self.config.namespace, path)
    }
}

#[async_trait]
impl VectorBackend for ExternalVectorBackend {
    async fn upsert(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<Value>,
        documents: Vec<Option<String>>,
    ) -> GraphResult<()> {
        let body = serde_json::json!({
            "ids": ids,
            "embeddings": embeddings,
            "metadatas": metadatas,
            "documents": documents,
        });
        self.client
            .post(self.url("upsert"))
            .json(&body)
            .send()
            .await
            .map_err(|e| GraphError::storage_error(format!("upserting to external index: {e}")))?
            .error_for_status()
            .map_err(|e| GraphError::storage_error(format!("external index rejected upsert: {e}")))?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], n: usize, r#where: Option<&Value>) -> GraphResult<Vec<QueryMatch>> {
        let body = serde_json::json!({
            "embedding": embedding,
            "n": n,
            "where": r#where,
        });
        let response = self
            .client
            .post(self.url("query"))
            .json(&body)
            .send()
            .await
            .map_err(|e| GraphError::storage_error(format!("querying external index: {e}")))?
            .error_for_status()
            .map_err(|e| GraphError::storage_error(format!("external index rejected query: {e}")))?;

        #[derive(serde::Deserialize)]
        struct Match {
            id: String,
            similarity: f32,
            metadata: Value,
            document: Option<String>,
        }
        let matches: Vec<Match> = response
            .json()
            .await
            .map_err(|e| GraphError::storage_error(format!("parsing external index response: {e}")))?;
        Ok(matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                similarity: m.similarity,
                metadata: m.metadata,
                document: m.document,
            })
            .collect())
    }

    async fn fetch(&self, ids: &[String]) -> GraphResult<Vec<QueryMatch>> {
        self.query(&[], ids.len().max(1), Some(&serde_json::json!({"id": {"$in": ids}})))
            .await
    }

    async fn delete(&self, ids: &[String]) -> GraphResult<()> {
        self.client
            .post(self.url("delete"))
            .json(&serde_json::json!({ "ids": ids }))
            .send()
            .await
            .map_err(|e| GraphError::storage_error(format!("deleting from external index: {e}")))?
            .error_for_status()
            .map_err(|e| GraphError::storage_error(format!("external index rejected delete: {e}")))?;
        Ok(())
    }

    async fn count(&self) -> GraphResult<usize> {
        #[derive(serde::Deserialize)]
        struct CountResponse {
            count: usize,
        }
        let response: CountResponse = self
            .client
            .get(self.url("count"))
            .send()
            .await
            .map_err(|e| GraphError::storage_error(format!("counting external index: {e}")))?
            .json()
            .await
            .map_err(|e| GraphError::storage_error(format!("parsing count response: {e}")))?;
        Ok(response.count)
    }

    async fn clear(&self) -> GraphResult<()> {
        self.client
            .post(self.url("clear"))
            .send()
            .await
            .map_err(|e| GraphError::storage_error(format!("clearing external index: {e}")))?
            .error_for_status()
            .map_err(|e| GraphError::storage_error(format!("external index rejected clear: {e}")))?;
        Ok(())
    }
}
