//! API error types and conversions

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

use crate::render::ERROR_PAGE;

/// API error type that converts to HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The status page could not be rendered
    #[error("Render error: {0}")]
    Render(#[from] std::fmt::Error),

    /// 500 Internal Server Error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "API error");
        (StatusCode::INTERNAL_SERVER_ERROR, Html(ERROR_PAGE)).into_response()
    }
}
