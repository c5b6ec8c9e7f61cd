//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, OrderError};
use event_bus::EventBusError;
use projections::ProjectionError;
use publisher::PublisherError;
use write_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// A command failed.
    Domain(DomainError),
    /// A read-model query failed.
    Projection(ProjectionError),
    /// The outbox drain failed.
    Publisher(PublisherError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => (domain_status(&err), err.to_string()),
            ApiError::Projection(err) => (projection_status(&err), err.to_string()),
            ApiError::Publisher(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Order(OrderError::ItemNotFound { .. }) => StatusCode::NOT_FOUND,
        _ if err.is_not_found() => StatusCode::NOT_FOUND,
        _ if err.is_conflict() => StatusCode::CONFLICT,
        _ if err.is_rule_violation() => StatusCode::BAD_REQUEST,
        DomainError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn projection_status(err: &ProjectionError) -> StatusCode {
    if err.is_retryable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Projection(err)
    }
}

impl From<PublisherError> for ApiError {
    fn from(err: PublisherError) -> Self {
        ApiError::Publisher(err)
    }
}

/// Failures while assembling stores and transports at startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Write store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("Read model setup failed: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Event bus setup failed: {0}")]
    Bus(#[from] EventBusError),
}
