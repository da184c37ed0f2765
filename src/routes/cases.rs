//! Case lifecycle routes
//!
//! - `POST /cases` - run the registration saga (auth optional)
//! - `PUT /cases/{id}/status` - close a case (listed owner)
//! - `POST /cases/{id}/flag` - flag a case
//! - `POST /cases/{id}/assign` - assign a case (elevated role)

use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::schemas::FlagReason;
use crate::registration::RegistrationRequest;
use crate::routes::{
    authenticate, error_response, json_response, parse_json_body, unauthorized_response, BoxBody,
    MAX_BODY_BYTES, MAX_REGISTRATION_BODY_BYTES,
};
use crate::server::AppState;

#[derive(Debug, Serialize)]
struct RegisterResponse {
    case_id: String,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct CloseRequest {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    reunited: bool,
}

#[derive(Debug, Deserialize)]
struct FlagRequest {
    reason: FlagReason,
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    user_id: String,
}

pub async fn handle_register(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    // Registration is open to anonymous reporters
    let actor = authenticate(&state, &req);

    let body: RegistrationRequest =
        match parse_json_body(req, MAX_REGISTRATION_BODY_BYTES).await {
            Ok(b) => b,
            Err(e) => return error_response(&e),
        };

    match state.registrar.register(actor.as_ref(), body).await {
        Ok(case_id) => json_response(StatusCode::CREATED, &RegisterResponse { case_id }),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_close(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    case_id: &str,
) -> Response<BoxBody> {
    let Some(actor) = authenticate(&state, &req) else {
        return unauthorized_response();
    };

    let body: CloseRequest = match parse_json_body(req, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    match state
        .case_service
        .close(&actor, case_id, body.reason, body.reunited)
        .await
    {
        Ok(()) => json_response(StatusCode::OK, &SuccessResponse { success: true }),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_flag(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    case_id: &str,
) -> Response<BoxBody> {
    let Some(actor) = authenticate(&state, &req) else {
        return unauthorized_response();
    };

    let body: FlagRequest = match parse_json_body(req, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    match state.case_service.flag(&actor, case_id, body.reason).await {
        Ok(()) => json_response(StatusCode::OK, &SuccessResponse { success: true }),
        Err(e) => error_response(&e),
    }
}

pub async fn handle_assign(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    case_id: &str,
) -> Response<BoxBody> {
    let Some(actor) = authenticate(&state, &req) else {
        return unauthorized_response();
    };

    let body: AssignRequest = match parse_json_body(req, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    match state
        .case_service
        .assign(&actor, case_id, &body.user_id)
        .await
    {
        Ok(()) => json_response(StatusCode::OK, &SuccessResponse { success: true }),
        Err(e) => error_response(&e),
    }
}
