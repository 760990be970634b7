//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use stockval_common::Error;

use crate::data::{FetchError, ParseSegmentError, RepositoryError};
use crate::orchestrator::TriggerError;
use crate::refresh::JobFailure;
use crate::screening::ParseVerdictError;
use crate::valuation::ValuationError;

/// Error body returned to API clients.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Service error rendered as `{"success": false, "error": {...}}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self(Error::NotFound(message.into()))
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = serde_json::json!({
            "success": false,
            "error": ErrorBody {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<ValuationError> for ApiError {
    fn from(err: ValuationError) -> Self {
        Self(err.into())
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        Self(err.into())
    }
}

impl From<TriggerError> for ApiError {
    fn from(err: TriggerError) -> Self {
        Self(err.into())
    }
}

impl From<ParseSegmentError> for ApiError {
    fn from(err: ParseSegmentError) -> Self {
        Self(Error::InvalidInput(err.to_string()))
    }
}

impl From<ParseVerdictError> for ApiError {
    fn from(err: ParseVerdictError) -> Self {
        Self(Error::InvalidInput(err.to_string()))
    }
}

impl From<JobFailure> for ApiError {
    fn from(err: JobFailure) -> Self {
        let message = err.to_string();
        Self(match err {
            JobFailure::Timeout(_) => Error::Timeout(message),
            JobFailure::Fetch {
                source: FetchError::NotFound { .. },
                ..
            } => Error::NotFound(message),
            JobFailure::Fetch { .. } => Error::External(message),
            JobFailure::Repository(_) => Error::Storage(message),
            JobFailure::Aborted(_) => Error::Internal(message),
        })
    }
}
