//! Error taxonomy shared by the HTTP surface and the job runner.
//!
//! Adapters (crypto, db, kv, ai, delivery) classify raw failures into one of
//! these kinds; only the top of the request/job handling loop decides what
//! to do about it (retry, dead-letter, HTTP status). See spec §7.

use rocket::http::Status;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;
use serde_json::json;

/// The error taxonomy from spec §7, by kind rather than by source type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("tenant: {0}")]
    Tenant(String),

    #[error("policy: {0}")]
    Policy(String),

    #[error("upstream transient: {0}")]
    UpstreamTransient(String),

    #[error("upstream terminal: {0}")]
    UpstreamTerminal(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code. Never leaks secrets/stack traces.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Tenant(_) => "TENANT_ERROR",
            AppError::Policy(_) => "POLICY_ERROR",
            AppError::UpstreamTransient(_) => "UPSTREAM_TRANSIENT",
            AppError::UpstreamTerminal(_) => "UPSTREAM_TERMINAL",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            AppError::Validation(_) => Status::BadRequest,
            AppError::Auth(_) => Status::Unauthorized,
            AppError::Tenant(_) => Status::BadRequest,
            AppError::Policy(_) => Status::UnprocessableEntity,
            AppError::UpstreamTransient(_) => Status::BadGateway,
            AppError::UpstreamTerminal(_) => Status::BadGateway,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }

    /// Whether a job-runner failure of this kind should be retried with
    /// backoff (vs. dead-lettered immediately). Mirrors spec §7's
    /// propagation policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::UpstreamTransient(_) | AppError::Internal(_))
    }
}

/// Rocket responder: a stable error code + trace id, never raw upstream
/// detail. Mirrors the teacher's `rate_limit.rs` `RateLimitedError`
/// Responder pattern, generalized across the whole taxonomy.
impl<'r, 'o: 'r> Responder<'r, 'o> for AppError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let trace_id = uuid::Uuid::new_v4().to_string();
        tracing::warn!(error_class = self.code(), trace_id = %trace_id, "request failed");
        let body = Json(json!({
            "error": self.code(),
            "trace_id": trace_id,
        }));
        Response::build_from(body.respond_to(req)?)
            .status(self.status())
            .ok()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::Validation("not found".into()),
            rusqlite::Error::SqliteFailure(ref se, _)
                if se.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                AppError::Internal("constraint violation".into())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for AppError {
    fn from(e: r2d2::Error) -> Self {
        AppError::Internal(format!("pool: {e}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            AppError::UpstreamTransient(e.to_string())
        } else if let Some(status) = e.status() {
            if status.is_server_error() || status.as_u16() == 429 {
                AppError::UpstreamTransient(format!("http {status}"))
            } else {
                AppError::UpstreamTerminal(format!("http {status}"))
            }
        } else {
            AppError::UpstreamTransient(e.to_string())
        }
    }
}
