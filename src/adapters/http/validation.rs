//! Request parameter validation shared by the streaming and video handlers.

use super::response::ApiError;
use crate::domain::quality::is_valid_quality;
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

pub fn parse_video_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::validation("Invalid video ID format"))
}

pub fn require_quality(raw: &str) -> Result<(), ApiError> {
    if is_valid_quality(raw) {
        Ok(())
    } else {
        Err(ApiError::validation("Invalid quality parameter"))
    }
}

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^segment_\d{3}\.ts$").unwrap())
}

pub fn require_segment_name(raw: &str) -> Result<(), ApiError> {
    if segment_pattern().is_match(raw) {
        Ok(())
    } else {
        Err(ApiError::validation("Invalid segment name"))
    }
}

/// Clamp pagination to `page >= 1`, `1 <= limit <= 100` (default 20).
pub fn normalize_pagination(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let limit = match limit {
        Some(l) if (1..=MAX_PAGE_LIMIT).contains(&l) => l,
        _ => DEFAULT_PAGE_LIMIT,
    };
    (page, limit)
}
