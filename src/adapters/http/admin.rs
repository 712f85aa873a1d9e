//! Admin endpoints: failed-video retry, playlist cache invalidation, queue
//! introspection.

use super::response::{success, ApiError};
use super::validation::parse_video_id;
use super::AppState;
use crate::domain::video::VideoStatus;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;

/// POST /api/admin/videos/{id}/retry — only failed videos can go again.
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let video_id = parse_video_id(&id)?;
    let video = state.repo.get_by_id(video_id).await?;

    if video.status != VideoStatus::Failed {
        return Err(ApiError::bad_request("Only failed videos can be retried"));
    }

    state
        .repo
        .update_status(video_id, VideoStatus::Uploading)
        .await?;
    state.repo.update_progress(video_id, 0).await?;

    // Retries go to the default queue at priority 1.
    state
        .queue
        .enqueue_video_processing(video_id, 1)
        .await
        .map_err(|e| {
            tracing::error!(video_id = %video_id, "failed to enqueue retry: {}", e);
            ApiError::internal("Failed to enqueue video for processing")
        })?;

    Ok(success(
        StatusCode::OK,
        json!({
            "message": "Video processing retry initiated",
            "video_id": video_id,
        }),
    ))
}

/// DELETE /api/admin/videos/{id}/cache
pub async fn clear_cache(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let video_id = parse_video_id(&id)?;
    let deleted = state.cache.invalidate(video_id).await.map_err(|e| {
        tracing::error!(video_id = %video_id, "cache invalidation failed: {}", e);
        ApiError::internal("Failed to clear playlist cache")
    })?;

    Ok(success(
        StatusCode::OK,
        json!({
            "message": "Playlist cache cleared",
            "deleted": deleted,
        }),
    ))
}

/// GET /api/admin/queue/stats
pub async fn queue_stats(State(state): State<AppState>) -> Result<Response, ApiError> {
    let stats = state.queue.stats().await.map_err(|e| {
        tracing::error!("failed to read queue stats: {}", e);
        ApiError::internal("Failed to retrieve queue statistics")
    })?;
    Ok(success(StatusCode::OK, stats))
}
