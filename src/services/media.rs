//! Object-storage client for case images
//!
//! Images live under deterministic keys
//! (`{jurisdiction}/{case_id}_{index}`) so compensation can remove them
//! without bookkeeping.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::types::{Error, Result};

/// Deterministic storage key for a case image
pub fn media_key(jurisdiction: &str, case_id: &str, index: usize) -> String {
    format!("{}/{}_{}", jurisdiction, case_id, index)
}

/// Object storage seam
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;

    /// Idempotent: deleting an absent object is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// HTTP object-storage client
pub struct HttpMediaStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMediaStore {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/store/{}", self.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let response = self
            .client
            .put(self.object_url(key))
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| Error::external("object-storage", format!("upload failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::external(
                "object-storage",
                format!("upload of {} returned {}", key, response.status()),
            ));
        }

        debug!(key, "image stored");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.object_url(key))
            .send()
            .await
            .map_err(|e| Error::external("object-storage", format!("delete failed: {}", e)))?;

        // 404 means the object was never written; the compensation is done
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Error::external(
                "object-storage",
                format!("delete of {} returned {}", key, response.status()),
            ));
        }

        debug!(key, "image deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_key_layout() {
        assert_eq!(media_key("ng-lagos", "66f0aa", 0), "ng-lagos/66f0aa_0");
        assert_eq!(media_key("ng-lagos", "66f0aa", 1), "ng-lagos/66f0aa_1");
    }
}
