//! HTTP routes for Reunite
//!
//! Handlers parse JSON bodies, call into the services held by
//! [`AppState`](crate::server::AppState), and translate the error
//! taxonomy into HTTP responses in one place.

pub mod cases;
pub mod health;
pub mod matches;
pub mod notifications;

pub use cases::{handle_assign, handle_close, handle_flag, handle_register};
pub use health::{health_check, readiness_check, version_info};
pub use matches::handle_find_matches;
pub use notifications::{handle_mark_all_read, handle_mark_read};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::{extract_token_from_header, Actor};
use crate::server::AppState;
use crate::types::Error;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Body cap for ordinary JSON endpoints
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Body cap for registration (two base64 images)
pub const MAX_REGISTRATION_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(full_body(json))
        .unwrap()
}

pub fn cors_preflight() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .header("Access-Control-Max-Age", "86400")
        .body(empty_body())
        .unwrap()
}

pub fn not_found_response(path: &str) -> Response<BoxBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse {
            error: format!("No route for {}", path),
            code: Some("not_found".to_string()),
        },
    )
}

/// Render an error from the taxonomy. Authorization details stay in the
/// logs; rate limits carry a Retry-After header.
pub fn error_response(err: &Error) -> Response<BoxBody> {
    if let Error::Authorization { reason } = err {
        warn!("authorization denied: {}", reason);
    }

    let body = ErrorResponse {
        error: err.to_string(),
        code: Some(err.code().to_string()),
    };
    let json = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());

    let mut builder = Response::builder()
        .status(err.status_code())
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*");

    if let Error::RateLimit { retry_after_secs } = err {
        builder = builder.header("Retry-After", retry_after_secs.to_string());
    }

    builder.body(full_body(json)).unwrap()
}

pub fn unauthorized_response() -> Response<BoxBody> {
    json_response(
        StatusCode::UNAUTHORIZED,
        &ErrorResponse {
            error: "Authentication required".to_string(),
            code: Some("unauthenticated".to_string()),
        },
    )
}

/// Read and deserialize a JSON body, bounded by `max_bytes`
pub async fn parse_json_body<T: for<'de> Deserialize<'de>>(
    req: Request<hyper::body::Incoming>,
    max_bytes: usize,
) -> Result<T, Error> {
    let body = req
        .collect()
        .await
        .map_err(|e| Error::Http(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > max_bytes {
        return Err(Error::Http("Request body too large".into()));
    }

    serde_json::from_slice(&bytes).map_err(|e| Error::Http(format!("Invalid JSON: {}", e)))
}

/// Caller identity from the Authorization header, if any
pub fn authenticate(state: &AppState, req: &Request<hyper::body::Incoming>) -> Option<Actor> {
    let header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    extract_token_from_header(header).and_then(|token| state.jwt.actor(token))
}

/// Leading path segment of `/cases/{id}/{suffix}` routes
pub fn case_path_id<'a>(path: &'a str, suffix: &str) -> Option<&'a str> {
    let id = path.strip_prefix("/cases/")?.strip_suffix(suffix)?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_path_id() {
        assert_eq!(case_path_id("/cases/abc123/flag", "/flag"), Some("abc123"));
        assert_eq!(case_path_id("/cases/abc123/status", "/status"), Some("abc123"));
        assert_eq!(case_path_id("/cases//flag", "/flag"), None);
        assert_eq!(case_path_id("/cases/a/b/flag", "/flag"), None);
        assert_eq!(case_path_id("/other/abc/flag", "/flag"), None);
    }
}
