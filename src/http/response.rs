//! JSON error responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// Errors the HTTP layer turns into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    /// The caller exceeded its budget and may retry after the given seconds.
    TooManyRequests { retry_after_secs: u64 },
    /// No route matched the request.
    NotFound,
    /// The request could not be handled, e.g. the counter store failed.
    Internal,
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            ApiError::TooManyRequests { .. } => "Too Many Requests",
            ApiError::NotFound => "Not Found",
            ApiError::Internal => "Internal Server Error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status(),
            Json(ErrorBody {
                error: self.message(),
            }),
        )
            .into_response();

        if let ApiError::TooManyRequests { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }

        response
    }
}
