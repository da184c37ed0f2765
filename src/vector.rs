//! Vector index client
//!
//! Nearest-neighbor similarity over face embeddings, partitioned by
//! jurisdiction namespace. Every committed case owns exactly two vectors,
//! `{case_id}_0` and `{case_id}_1`, carrying the metadata the search
//! filters on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::db::schemas::CaseStatus;
use crate::types::{Error, Result};

/// Vector id for one of a case's two embeddings
pub fn vector_id(case_id: &str, index: usize) -> String {
    format!("{}_{}", case_id, index)
}

/// Case id a vector id belongs to (strips the `_0`/`_1` suffix)
pub fn case_id_of(vector_id: &str) -> &str {
    match vector_id.rsplit_once('_') {
        Some((case_id, _)) => case_id,
        None => vector_id,
    }
}

/// Metadata stored with each vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub gender: String,
    pub status: CaseStatus,
    pub date_ts: i64,
}

/// One vector to upsert
#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// Filter applied to similarity queries
#[derive(Debug, Clone)]
pub struct VectorFilter {
    pub status: CaseStatus,
    pub gender: String,
    pub min_date_ts: i64,
}

/// One match returned by a similarity query
#[derive(Debug, Clone, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
}

/// Vector index seam
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, namespace: &str, vectors: Vec<VectorRecord>) -> Result<()>;

    /// KNN query seeded by a stored vector's id
    async fn query_by_id(
        &self,
        namespace: &str,
        id: &str,
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>>;

    /// Idempotent: deleting absent ids is a no-op.
    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()>;
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<VectorMatch>,
}

/// HTTP vector index client
pub struct HttpVectorIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpVectorIndex {
    pub fn new(client: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.client.post(url);
        if let Some(ref key) = self.api_key {
            request = request.header("Api-Key", key);
        }
        request
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn upsert(&self, namespace: &str, vectors: Vec<VectorRecord>) -> Result<()> {
        let response = self
            .request("/vectors/upsert")
            .json(&json!({ "namespace": namespace, "vectors": vectors }))
            .send()
            .await
            .map_err(|e| Error::external("vector-index", format!("upsert failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::external(
                "vector-index",
                format!("upsert returned {}", response.status()),
            ));
        }

        debug!(namespace, "vectors upserted");
        Ok(())
    }

    async fn query_by_id(
        &self,
        namespace: &str,
        id: &str,
        top_k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorMatch>> {
        let body = json!({
            "namespace": namespace,
            "id": id,
            "topK": top_k,
            "includeMetadata": false,
            "filter": {
                "status": { "$eq": filter.status.as_str() },
                "gender": { "$eq": filter.gender },
                "date_ts": { "$gte": filter.min_date_ts },
            },
        });

        let response = self
            .request("/query")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::external("vector-index", format!("query failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::external(
                "vector-index",
                format!("query returned {}", response.status()),
            ));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| Error::external("vector-index", format!("malformed response: {}", e)))?;

        Ok(parsed.matches)
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
        let response = self
            .request("/vectors/delete")
            .json(&json!({ "namespace": namespace, "ids": ids }))
            .send()
            .await
            .map_err(|e| Error::external("vector-index", format!("delete failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::external(
                "vector-index",
                format!("delete returned {}", response.status()),
            ));
        }

        debug!(namespace, count = ids.len(), "vectors deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_id_round_trip() {
        let id = vector_id("66f0aa", 0);
        assert_eq!(id, "66f0aa_0");
        assert_eq!(case_id_of(&id), "66f0aa");
        assert_eq!(case_id_of("66f0aa_1"), "66f0aa");
    }

    #[test]
    fn test_case_id_of_unsuffixed() {
        assert_eq!(case_id_of("raw"), "raw");
    }
}
