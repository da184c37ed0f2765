//! Similarity search route
//!
//! `POST /find-matches` - cooldown-gated candidate lookup. Returns ranked
//! case ids and scores; hydrating them into case summaries is the
//! caller's concern.

use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::routes::{error_response, json_response, parse_json_body, BoxBody, MAX_BODY_BYTES};
use crate::search::MatchCandidate;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
struct MatchRequest {
    case_id: String,
    /// Optional recency anchor override, epoch seconds
    #[serde(default)]
    reference_date: Option<i64>,
}

#[derive(Debug, Serialize)]
struct MatchResponse {
    matches: Vec<MatchCandidate>,
}

pub async fn handle_find_matches(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let body: MatchRequest = match parse_json_body(req, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    match state
        .search
        .find_matches(&body.case_id, body.reference_date)
        .await
    {
        Ok(matches) => json_response(StatusCode::OK, &MatchResponse { matches }),
        Err(e) => error_response(&e),
    }
}
