//! Maps `EngineError` onto HTTP status codes per the error taxonomy table.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::engine::EngineError;
use crate::store::StoreError;

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            Self::InvalidDefinition(_) => (StatusCode::BAD_REQUEST, "invalid_definition"),
            Self::WorkflowNotFound(_) | Self::ExecutionNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            Self::WorkflowArchived(_) | Self::AlreadyTerminal(_) => {
                (StatusCode::CONFLICT, "conflict")
            }
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::ExecutionTimeout => (StatusCode::INTERNAL_SERVER_ERROR, "execution_timeout"),
            Self::Orphaned => (StatusCode::INTERNAL_SERVER_ERROR, "orphaned"),
            Self::EventBus(_) => (StatusCode::INTERNAL_SERVER_ERROR, "event_bus_error"),
            Self::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Store(StoreError::StateConflict { .. }) => {
                (StatusCode::CONFLICT, "state_conflict")
            }
            Self::Store(StoreError::Database(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            Self::Store(StoreError::Serialization(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
        };

        let body = ErrorBody {
            kind,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
