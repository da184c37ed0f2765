//! Error taxonomy and shared result type
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! map one-to-one onto HTTP statuses in [`Error::status_code`] so route
//! handlers never hand-pick a status.

use hyper::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad input; never retried.
    #[error("{0}")]
    Validation(String),

    /// Role or ownership failure. Rendered opaquely so callers cannot
    /// probe for case existence; `reason` is for logs only.
    #[error("not authorized")]
    Authorization { reason: String },

    /// Duplicate reference number, already-assigned/flagged/closed.
    #[error("{0}")]
    Conflict(String),

    /// Moderation/embedding/object-store/vector-index failure. Carries a
    /// remediation-specific message where the upstream gave one.
    #[error("{service}: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    /// Cooldown or request window not yet elapsed.
    #[error("rate limited, retry in {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("bad request: {0}")]
    Http(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Opaque authorization failure with a server-side reason.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Error::Authorization {
            reason: reason.into(),
        }
    }

    pub fn external(service: &'static str, message: impl Into<String>) -> Self {
        Error::ExternalService {
            service,
            message: message.into(),
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::Http(_) => StatusCode::BAD_REQUEST,
            Error::Authorization { .. } => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            Error::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Database(_) | Error::Io(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Authorization { .. } => "authorization_error",
            Error::Conflict(_) => "conflict",
            Error::ExternalService { .. } => "external_service_error",
            Error::RateLimit { .. } => "rate_limited",
            Error::NotFound(_) => "not_found",
            Error::Database(_) => "database_error",
            Error::Http(_) => "bad_request",
            Error::Io(_) | Error::Internal(_) => "internal_error",
        }
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(e: mongodb::error::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<bson::oid::Error> for Error {
    fn from(_: bson::oid::Error) -> Self {
        Error::Validation("malformed case id".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::unauthorized("owner mismatch").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::Conflict("dup".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::RateLimit {
                retry_after_secs: 10
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::external("embedding", "down").status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_authorization_is_opaque() {
        let err = Error::unauthorized("actor is not the listed owner of case 123");
        assert_eq!(err.to_string(), "not authorized");
    }
}
