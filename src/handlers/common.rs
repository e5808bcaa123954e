use crate::{config::AppConfig, ApiResponse, PaginatedResponse};
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

/// Pagination parameters for list operations
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize)]
pub struct PaginationParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl PaginationParams {
    /// 1-based page and a page size clamped to the configured bounds
    pub fn resolve(&self, config: &AppConfig) -> (u64, u64) {
        (self.page.unwrap_or(1).max(1), config.page_size(self.per_page))
    }
}

pub fn paginated<T>(items: Vec<T>, total: u64, page: u64, limit: u64) -> PaginatedResponse<T> {
    let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
    PaginatedResponse {
        items,
        total,
        page,
        limit,
        total_pages,
    }
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

/// Standard no content response
pub fn no_content_response() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}
