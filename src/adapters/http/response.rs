//! The JSON response envelope: `{success, data?, error?}` with a
//! `pagination` object on list responses.

use crate::ports::repository::RepositoryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

pub fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(json!({ "success": true, "data": data }))).into_response()
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl PaginationMeta {
    pub fn new(total: i64, page: i64, limit: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            total,
            page,
            limit,
            total_pages,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }
}

pub fn success_list<T: Serialize>(data: T, pagination: PaginationMeta) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": data, "pagination": pagination })),
    )
        .into_response()
}

/// API failure carrying the status code and machine-readable error code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "success": false,
                "error": { "code": self.code, "message": self.message }
            })),
        )
            .into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => ApiError::not_found("Video not found"),
            RepositoryError::Backend(e) => {
                tracing::error!("repository failure: {}", e);
                ApiError::internal("Failed to access video records")
            }
        }
    }
}
