//! Face-embedding client
//!
//! Talks to the remote embedding function: both images go up as base64,
//! and unless verification is bypassed the function also asserts the two
//! images depict the same individual. Failures map to remediation-specific
//! messages so callers can tell a retake-the-photo problem from a
//! wrong-photos problem from an outage.
//!
//! The function wraps its JSON payload in a `{statusCode, body}` envelope
//! where `body` is itself a JSON string.

use async_trait::async_trait;
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Error, Result};

/// Remediation message when no face could be located
pub const MSG_NO_FACE: &str =
    "no face could be detected in one of the images; retake the photos with the face clearly visible";

/// Remediation message when the two images show different people
pub const MSG_IDENTITY_MISMATCH: &str =
    "the two images appear to show different people; upload two photos of the same person";

/// Generic failure message
pub const MSG_EMBEDDING_FAILED: &str =
    "the face-embedding service could not process the images; try again later";

/// Normalized embeddings for the two uploaded images
#[derive(Debug, Clone)]
pub struct EmbeddingPair {
    pub first: Vec<f32>,
    pub second: Vec<f32>,
}

/// Remote embedding function seam
#[async_trait]
pub trait FaceEmbedder: Send + Sync {
    /// Compute embeddings for both images. When `verify_identity` is set
    /// the function also rejects pairs that do not depict the same person.
    async fn embeddings(
        &self,
        first: &[u8],
        second: &[u8],
        verify_identity: bool,
    ) -> Result<EmbeddingPair>;
}

#[derive(Serialize)]
struct EmbeddingRequest {
    file1: FilePayload,
    file2: FilePayload,
    do_verify: bool,
}

#[derive(Serialize)]
struct FilePayload {
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status_code: u16,
    body: String,
}

#[derive(Deserialize)]
struct EmbeddingBody {
    embedding1: Vec<f32>,
    embedding2: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

/// HTTP embedding client
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEmbedder {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl FaceEmbedder for HttpEmbedder {
    async fn embeddings(
        &self,
        first: &[u8],
        second: &[u8],
        verify_identity: bool,
    ) -> Result<EmbeddingPair> {
        let url = format!("{}/get-embeddings", self.base_url.trim_end_matches('/'));
        let body = EmbeddingRequest {
            file1: FilePayload {
                data: BASE64_STANDARD.encode(first),
            },
            file2: FilePayload {
                data: BASE64_STANDARD.encode(second),
            },
            do_verify: verify_identity,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::external("embedding", format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::external(
                "embedding",
                format!("service returned {}", response.status()),
            ));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| Error::external("embedding", format!("malformed response: {}", e)))?;

        if envelope.status_code != 200 {
            let detail = serde_json::from_str::<ErrorBody>(&envelope.body)
                .map(|b| b.error)
                .unwrap_or_default();
            return Err(map_failure(&detail));
        }

        let parsed: EmbeddingBody = serde_json::from_str(&envelope.body)
            .map_err(|e| Error::external("embedding", format!("malformed payload: {}", e)))?;

        debug!(
            dims = parsed.embedding1.len(),
            verified = verify_identity,
            "embeddings computed"
        );

        Ok(EmbeddingPair {
            first: parsed.embedding1,
            second: parsed.embedding2,
        })
    }
}

/// Map an upstream error string to a remediation-specific error
pub fn map_failure(detail: &str) -> Error {
    let lowered = detail.to_lowercase();
    if lowered.contains("no face") || lowered.contains("face not detected") {
        Error::external("embedding", MSG_NO_FACE)
    } else if lowered.contains("different people") {
        Error::external("embedding", MSG_IDENTITY_MISMATCH)
    } else {
        Error::external("embedding", MSG_EMBEDDING_FAILED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(err: Error) -> String {
        match err {
            Error::ExternalService { message, .. } => message,
            other => panic!("expected external service error, got {:?}", other),
        }
    }

    #[test]
    fn test_no_face_maps_to_remediation() {
        let msg = message(map_failure(
            "Face not detected in one or both images during pre-check.",
        ));
        assert_eq!(msg, MSG_NO_FACE);

        let msg = message(map_failure("No face found in image: /tmp/x.jpg"));
        assert_eq!(msg, MSG_NO_FACE);
    }

    #[test]
    fn test_identity_mismatch_maps_to_remediation() {
        let msg = message(map_failure("The faces belong to different people"));
        assert_eq!(msg, MSG_IDENTITY_MISMATCH);
    }

    #[test]
    fn test_unknown_failure_maps_to_generic() {
        let msg = message(map_failure("CUDA out of memory"));
        assert_eq!(msg, MSG_EMBEDDING_FAILED);
    }
}
