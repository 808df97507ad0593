//! API Middleware
//!
//! Operation context extraction and request logging.

use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::error::AppError;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

// =========================================================================
// Operation Context Middleware
// =========================================================================

/// Build the `OperationContext` from request headers.
///
/// - `X-Correlation-Id`: UUID, generated when absent, echoed on the response
/// - `X-Request-Timeout-Ms`: deadline for the ledger operation
pub fn context_from_headers(headers: &HeaderMap) -> Result<OperationContext, AppError> {
    let mut context = OperationContext::new();

    if let Some(value) = headers.get(CORRELATION_ID_HEADER) {
        let id = value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .ok_or_else(|| AppError::InvalidHeader("X-Correlation-Id".to_string()))?;
        context = context.with_correlation_id(id);
    }

    if let Some(value) = headers.get(REQUEST_TIMEOUT_HEADER) {
        let millis: u64 = value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .filter(|ms| *ms > 0)
            .ok_or_else(|| AppError::InvalidHeader("X-Request-Timeout-Ms".to_string()))?;
        context = context.with_timeout(Duration::from_millis(millis));
    }

    context.ensure_correlation_id();
    Ok(context)
}

pub async fn context_middleware(mut request: Request<Body>, next: Next) -> Response {
    let context = match context_from_headers(request.headers()) {
        Ok(context) => context,
        Err(e) => return e.into_response(),
    };
    let correlation_id = context.correlation_id;

    request.extensions_mut().insert(context);
    let mut response = next.run(request).await;

    if let Some(id) = correlation_id {
        if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
            response.headers_mut().insert(CORRELATION_ID_HEADER, value);
        }
    }

    response
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Sensitive headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "x-api-key"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let masked_value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());
    let correlation_id = request
        .extensions()
        .get::<OperationContext>()
        .and_then(|ctx| ctx.correlation_id);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = start.elapsed().as_millis() as u64,
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}
