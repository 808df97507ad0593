//! Error handling module
//!
//! HTTP-facing error type and response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::LedgerError;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid header {0}")]
    InvalidHeader(String),

    // Ledger errors
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::InvalidHeader(header) => {
                (StatusCode::BAD_REQUEST, "invalid_header", Some(header.clone()))
            }

            AppError::Ledger(err) => match err {
                LedgerError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "validation_error", Some(msg.clone()))
                }
                LedgerError::NotFound(what) => {
                    (StatusCode::NOT_FOUND, "not_found", Some(what.clone()))
                }
                LedgerError::DeadlineExceeded => {
                    (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded", None)
                }
                LedgerError::Cancelled => {
                    (StatusCode::SERVICE_UNAVAILABLE, "cancelled", None)
                }
                LedgerError::TransientStorage(msg) => {
                    tracing::error!(error = %msg, "Transient storage error");
                    (StatusCode::SERVICE_UNAVAILABLE, "transient_storage_error", None)
                }
                LedgerError::StorageRejected(msg) => {
                    tracing::error!(error = %msg, "Storage rejected request");
                    (StatusCode::INTERNAL_SERVER_ERROR, "storage_rejected", None)
                }
                LedgerError::Publish(msg) | LedgerError::PoisonMessage(msg) => {
                    tracing::error!(error = %msg, "Unexpected ledger error in request path");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
                }
            },
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
