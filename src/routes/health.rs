//! Health check endpoints
//!
//! Kubernetes-style probes:
//! - /health, /healthz - liveness (is the service running?)
//! - /ready, /readyz - readiness (is the document store reachable?)
//! - /version - build info for deployment verification

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::{json_response, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    node_id: String,
    live_sessions: usize,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
    commit: &'static str,
    built_at: &'static str,
}

/// Liveness probe - 200 whenever the process is up
pub fn health_check(state: Arc<AppState>) -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &HealthResponse {
            healthy: true,
            node_id: state.args.node_id.to_string(),
            live_sessions: state.registry.session_count(),
        },
    )
}

/// Readiness probe - 200 only when the document store answers a ping
pub async fn readiness_check(state: Arc<AppState>) -> Response<BoxBody> {
    match state.mongo.ping().await {
        Ok(()) => json_response(
            StatusCode::OK,
            &ReadinessResponse {
                ready: true,
                error: None,
            },
        ),
        Err(e) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &ReadinessResponse {
                ready: false,
                error: Some(e.to_string()),
            },
        ),
    }
}

/// Build info
pub fn version_info() -> Response<BoxBody> {
    json_response(
        StatusCode::OK,
        &VersionResponse {
            version: env!("CARGO_PKG_VERSION"),
            commit: env!("GIT_COMMIT_SHORT"),
            built_at: env!("BUILD_TIMESTAMP"),
        },
    )
}
