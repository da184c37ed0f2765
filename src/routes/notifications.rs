//! Notification read-state routes
//!
//! `POST /notifications/read` and `POST /notifications/read-all`. Both
//! are idempotent; the response partitions the requested ids so clients
//! can reconcile optimistic state.

use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

use crate::routes::{
    authenticate, error_response, json_response, parse_json_body, unauthorized_response, BoxBody,
    MAX_BODY_BYTES,
};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
struct ReadRequest {
    #[serde(default)]
    ids: Vec<String>,
}

pub async fn handle_mark_read(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let Some(actor) = authenticate(&state, &req) else {
        return unauthorized_response();
    };

    let body: ReadRequest = match parse_json_body(req, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    match state.notifier.mark_read(&actor.id, &body.ids).await {
        Ok(receipt) => json_response(StatusCode::OK, &receipt),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_mark_all_read(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let Some(actor) = authenticate(&state, &req) else {
        return unauthorized_response();
    };

    match state.notifier.mark_all_read(&actor.id).await {
        Ok(receipt) => json_response(StatusCode::OK, &receipt),
        Err(e) => error_response(&e),
    }
}
