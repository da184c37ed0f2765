//! Similarity search service
//!
//! Given a case, find up to three candidate cases of the opposite status
//! by face similarity. Each case may search at most once per cooldown
//! window; the window is claimed atomically before the index is queried,
//! so a failed query still burns it (accepted trade-off, and the reason
//! this cooldown fails closed while the request limiter fails open).

use bson::{doc, oid::ObjectId, Bson, DateTime};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::db::schemas::CaseDoc;
use crate::db::MongoCollection;
use crate::types::{Error, Result};
use crate::vector::{case_id_of, vector_id, VectorFilter, VectorIndex, VectorMatch};

/// Ranked candidates returned per search
pub const MAX_RESULTS: usize = 3;

/// Nearest neighbors requested per stored embedding
pub const PER_QUERY_TOP_K: usize = 10;

/// Candidates must be dated within two months of the reference date
pub const LOOKBACK_SECS: i64 = 60 * 24 * 3600;

/// One ranked candidate
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub case_id: String,
    pub score: f32,
}

/// Seconds left on the cooldown, or `None` once it has elapsed
pub fn remaining_cooldown(last_ms: i64, now_ms: i64, cooldown: Duration) -> Option<u64> {
    let elapsed_ms = now_ms.saturating_sub(last_ms);
    let cooldown_ms = cooldown.as_millis() as i64;
    if elapsed_ms >= cooldown_ms {
        return None;
    }
    let remaining_ms = cooldown_ms - elapsed_ms;
    Some((remaining_ms as u64).div_ceil(1000))
}

/// Merge per-embedding result sets: dedup by candidate case id keeping
/// the higher score, drop the probe case itself, rank descending,
/// truncate
pub fn merge_matches(
    result_sets: Vec<Vec<VectorMatch>>,
    own_case_id: &str,
    limit: usize,
) -> Vec<MatchCandidate> {
    let mut best: HashMap<String, f32> = HashMap::new();

    for matches in result_sets {
        for m in matches {
            let candidate = case_id_of(&m.id);
            if candidate == own_case_id {
                continue;
            }
            let entry = best.entry(candidate.to_string()).or_insert(f32::MIN);
            if m.score > *entry {
                *entry = m.score;
            }
        }
    }

    let mut ranked: Vec<MatchCandidate> = best
        .into_iter()
        .map(|(case_id, score)| MatchCandidate { case_id, score })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.case_id.cmp(&b.case_id))
    });
    ranked.truncate(limit);
    ranked
}

/// Cooldown-gated similarity search
pub struct SearchService {
    cases: MongoCollection<CaseDoc>,
    vectors: Arc<dyn VectorIndex>,
    cooldown: Duration,
}

impl SearchService {
    pub fn new(
        cases: MongoCollection<CaseDoc>,
        vectors: Arc<dyn VectorIndex>,
        cooldown: Duration,
    ) -> Self {
        Self {
            cases,
            vectors,
            cooldown,
        }
    }

    /// Find up to [`MAX_RESULTS`] candidates of the opposite status.
    ///
    /// `reference_ts` (epoch seconds) overrides the case's own
    /// missing/found date as the recency anchor.
    pub async fn find_matches(
        &self,
        case_id: &str,
        reference_ts: Option<i64>,
    ) -> Result<Vec<MatchCandidate>> {
        let oid = ObjectId::parse_str(case_id)?;

        let case = self
            .cases
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or_else(|| Error::NotFound("case".to_string()))?;

        let opposite = case
            .status
            .opposite()
            .ok_or_else(|| Error::Conflict("closed cases cannot be searched".to_string()))?;

        let now = DateTime::now();
        let threshold = now.timestamp_millis() - self.cooldown.as_millis() as i64;

        // Claim the window before querying so a concurrent search on the
        // same case cannot run twice
        let claimed = self
            .cases
            .find_one_and_update(
                doc! {
                    "_id": oid,
                    "$or": [
                        { "last_searched_time": { "$exists": false } },
                        { "last_searched_time": Bson::Null },
                        { "last_searched_time": { "$lte": DateTime::from_millis(threshold) } },
                    ],
                },
                doc! { "$set": {
                    "last_searched_time": now,
                    "metadata.updated_at": now,
                }},
            )
            .await?;

        if claimed.is_none() {
            // Reload for a fresh anchor; the precheck copy may be stale
            let last = self
                .cases
                .find_one(doc! { "_id": oid })
                .await?
                .and_then(|c| c.last_searched_time)
                .map(|t| t.timestamp_millis())
                .unwrap_or_else(|| now.timestamp_millis());

            let retry_after_secs =
                remaining_cooldown(last, now.timestamp_millis(), self.cooldown).unwrap_or(1);
            return Err(Error::RateLimit { retry_after_secs });
        }

        let reference = reference_ts.unwrap_or(case.date_missing_found.timestamp_millis() / 1000);
        let filter = VectorFilter {
            status: opposite,
            gender: case.gender.clone(),
            min_date_ts: reference - LOOKBACK_SECS,
        };

        // One query per stored embedding
        let mut result_sets = Vec::with_capacity(2);
        for index in 0..2 {
            let matches = self
                .vectors
                .query_by_id(
                    &case.jurisdiction,
                    &vector_id(case_id, index),
                    PER_QUERY_TOP_K,
                    &filter,
                )
                .await?;
            result_sets.push(matches);
        }

        let ranked = merge_matches(result_sets, case_id, MAX_RESULTS);
        info!(
            case_id,
            candidates = ranked.len(),
            status = %opposite,
            "similarity search completed"
        );

        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOUR_HOURS: Duration = Duration::from_secs(4 * 3600);

    fn m(id: &str, score: f32) -> VectorMatch {
        VectorMatch {
            id: id.to_string(),
            score,
        }
    }

    #[test]
    fn test_cooldown_still_active_just_before_expiry() {
        // T + 3h59m
        let last = 0;
        let now = (4 * 3600 - 60) * 1000;
        assert_eq!(remaining_cooldown(last, now, FOUR_HOURS), Some(60));
    }

    #[test]
    fn test_cooldown_elapsed_at_exactly_four_hours() {
        let last = 0;
        let now = 4 * 3600 * 1000;
        assert_eq!(remaining_cooldown(last, now, FOUR_HOURS), None);
    }

    #[test]
    fn test_remaining_rounds_up() {
        let last = 0;
        let now = FOUR_HOURS.as_millis() as i64 - 1500;
        assert_eq!(remaining_cooldown(last, now, FOUR_HOURS), Some(2));
    }

    #[test]
    fn test_merge_dedups_keeping_higher_score() {
        let ranked = merge_matches(
            vec![
                vec![m("aaa_0", 0.91), m("bbb_0", 0.85)],
                vec![m("aaa_1", 0.95), m("ccc_1", 0.70)],
            ],
            "probe",
            MAX_RESULTS,
        );

        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].case_id, "aaa");
        assert!((ranked[0].score - 0.95).abs() < f32::EPSILON);
        assert_eq!(ranked[1].case_id, "bbb");
        assert_eq!(ranked[2].case_id, "ccc");
    }

    #[test]
    fn test_merge_excludes_probe_case() {
        let ranked = merge_matches(
            vec![vec![m("probe_0", 1.0), m("aaa_0", 0.5)]],
            "probe",
            MAX_RESULTS,
        );

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].case_id, "aaa");
    }

    #[test]
    fn test_merge_truncates_to_limit() {
        let ranked = merge_matches(
            vec![vec![
                m("a_0", 0.9),
                m("b_0", 0.8),
                m("c_0", 0.7),
                m("d_0", 0.6),
            ]],
            "probe",
            MAX_RESULTS,
        );

        assert_eq!(ranked.len(), MAX_RESULTS);
        assert_eq!(ranked[2].case_id, "c");
    }

    #[test]
    fn test_merge_sorted_descending() {
        let ranked = merge_matches(
            vec![vec![m("a_0", 0.2), m("b_0", 0.9), m("c_0", 0.5)]],
            "probe",
            MAX_RESULTS,
        );

        let scores: Vec<f32> = ranked.iter().map(|c| c.score).collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(scores, sorted);
    }
}
