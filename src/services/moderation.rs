//! Content-safety moderation client
//!
//! Each uploaded image is scored per category (0-7 severity). Any
//! category at or above the configured ceiling rejects the whole
//! registration before anything is created.

use async_trait::async_trait;
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Error, Result};

/// Per-category severity score returned by the classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub severity: u8,
}

/// Classifier verdict for one image
#[derive(Debug, Clone, Default)]
pub struct ModerationVerdict {
    pub categories: Vec<CategoryScore>,
}

impl ModerationVerdict {
    /// First category at or above `max_severity`, if any
    pub fn exceeds(&self, max_severity: u8) -> Option<&CategoryScore> {
        self.categories.iter().find(|c| c.severity >= max_severity)
    }
}

/// Content-safety classifier seam
#[async_trait]
pub trait ContentModerator: Send + Sync {
    async fn review(&self, image: &[u8]) -> Result<ModerationVerdict>;
}

#[derive(Serialize)]
struct AnalyzeRequest {
    image: AnalyzeImage,
}

#[derive(Serialize)]
struct AnalyzeImage {
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    #[serde(default)]
    categories_analysis: Vec<CategoryScore>,
}

/// HTTP moderation client
pub struct HttpModerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpModerator {
    pub fn new(client: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl ContentModerator for HttpModerator {
    async fn review(&self, image: &[u8]) -> Result<ModerationVerdict> {
        let url = format!("{}/image:analyze", self.base_url.trim_end_matches('/'));
        let body = AnalyzeRequest {
            image: AnalyzeImage {
                content: BASE64_STANDARD.encode(image),
            },
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header("Ocp-Apim-Subscription-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::external("moderation", format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::external(
                "moderation",
                format!("classifier returned {}", response.status()),
            ));
        }

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| Error::external("moderation", format!("malformed response: {}", e)))?;

        debug!(
            categories = parsed.categories_analysis.len(),
            "image moderated"
        );

        Ok(ModerationVerdict {
            categories: parsed.categories_analysis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(scores: &[(&str, u8)]) -> ModerationVerdict {
        ModerationVerdict {
            categories: scores
                .iter()
                .map(|(c, s)| CategoryScore {
                    category: c.to_string(),
                    severity: *s,
                })
                .collect(),
        }
    }

    #[test]
    fn test_exceeds_threshold() {
        let v = verdict(&[("violence", 0), ("sexual", 4)]);
        let hit = v.exceeds(2).expect("severity 4 should exceed ceiling 2");
        assert_eq!(hit.category, "sexual");
    }

    #[test]
    fn test_below_threshold_passes() {
        let v = verdict(&[("violence", 1), ("sexual", 1)]);
        assert!(v.exceeds(2).is_none());
    }

    #[test]
    fn test_ceiling_is_inclusive() {
        let v = verdict(&[("hate", 2)]);
        assert!(v.exceeds(2).is_some());
    }
}
