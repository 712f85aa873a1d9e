//! HLS and progressive delivery: manifests through the read-through
//! playlist cache, segments and MP4s straight from disk.

use super::response::ApiError;
use super::validation::{parse_video_id, require_quality, require_segment_name};
use super::AppState;
use axum::extract::{Path, Request, State};
use axum::http::header::{ACCEPT_RANGES, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use uuid::Uuid;

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/MP2T";
const PLAYLIST_CACHE_CONTROL: &str = "public, max-age=3600";
const SEGMENT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// GET /api/videos/{id}/hls/master.m3u8
pub async fn master_playlist(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let video_id = parse_video_id(&id)?;
    let video = state.repo.get_by_id(video_id).await?;

    if !video.hls_ready || video.hls_master_path.is_none() {
        return Err(ApiError::with_code(
            StatusCode::NOT_FOUND,
            "HLS_NOT_READY",
            "HLS streaming not available for this video",
        ));
    }

    let path = state.config.storage.master_path(video_id);
    serve_cached_playlist(&state, video_id, "master", path).await
}

/// GET /api/videos/{id}/hls/{quality}/playlist.m3u8
pub async fn variant_playlist(
    State(state): State<AppState>,
    Path((id, quality)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let video_id = parse_video_id(&id)?;
    require_quality(&quality)?;
    let video = state.repo.get_by_id(video_id).await?;

    if !video.hls_ready {
        return Err(ApiError::with_code(
            StatusCode::NOT_FOUND,
            "HLS_NOT_READY",
            "HLS streaming not available",
        ));
    }

    let path = state.config.storage.variant_playlist_path(video_id, &quality);
    serve_cached_playlist(&state, video_id, &quality, path).await
}

/// Cache-first manifest read: hit serves the cached text, miss reads disk
/// and repopulates. Cache failures degrade to plain disk reads.
async fn serve_cached_playlist(
    state: &AppState,
    video_id: Uuid,
    name: &str,
    path: std::path::PathBuf,
) -> Result<Response, ApiError> {
    match state.cache.get(video_id, name).await {
        Ok(Some(cached)) => return Ok(playlist_response(cached)),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(video_id = %video_id, name, "playlist cache read failed: {}", e);
        }
    }

    let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
        tracing::error!(
            video_id = %video_id,
            path = %path.display(),
            "failed to read playlist: {}",
            e
        );
        ApiError::with_code(
            StatusCode::NOT_FOUND,
            "PLAYLIST_NOT_FOUND",
            "Playlist file not found",
        )
    })?;

    if let Err(e) = state.cache.set(video_id, name, &content).await {
        tracing::warn!(video_id = %video_id, name, "playlist cache write failed: {}", e);
    }

    Ok(playlist_response(content))
}

fn playlist_response(content: String) -> Response {
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (CACHE_CONTROL, PLAYLIST_CACHE_CONTROL),
        ],
        [
            ("access-control-allow-origin", "*"),
            ("access-control-allow-methods", "GET, OPTIONS"),
        ],
        content,
    )
        .into_response()
}

/// GET /api/videos/{id}/hls/{quality}/{segment}
pub async fn segment(
    State(state): State<AppState>,
    Path((id, quality, segment)): Path<(String, String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let video_id = parse_video_id(&id)?;
    require_quality(&quality)?;
    require_segment_name(&segment)?;

    let video = state.repo.get_by_id(video_id).await?;
    if !video.hls_ready {
        return Err(ApiError::with_code(
            StatusCode::NOT_FOUND,
            "HLS_NOT_READY",
            "HLS streaming not available",
        ));
    }

    let path = state.config.storage.segment_path(video_id, &quality, &segment);
    if tokio::fs::metadata(&path).await.is_err() {
        tracing::error!(
            video_id = %video_id,
            quality = %quality,
            segment = %segment,
            "segment not found"
        );
        return Err(ApiError::with_code(
            StatusCode::NOT_FOUND,
            "SEGMENT_NOT_FOUND",
            "Segment file not found",
        ));
    }

    serve_file(
        path,
        request,
        SEGMENT_CONTENT_TYPE,
        SEGMENT_CACHE_CONTROL,
        "Failed to read segment",
    )
    .await
}

/// GET /api/videos/{id}/stream/{quality} — progressive MP4 fallback.
pub async fn mp4_fallback(
    State(state): State<AppState>,
    Path((id, quality)): Path<(String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let video_id = parse_video_id(&id)?;
    require_quality(&quality)?;

    let video = state.repo.get_by_id(video_id).await?;
    if !video.can_be_streamed() {
        return Err(ApiError::with_code(
            StatusCode::NOT_FOUND,
            "VIDEO_NOT_READY",
            "Video not ready for streaming",
        ));
    }
    if !video.available_qualities.iter().any(|q| q == &quality) {
        return Err(ApiError::validation("Quality not available for this video"));
    }

    let path = state.config.storage.mp4_path(video_id, &quality);
    if tokio::fs::metadata(&path).await.is_err() {
        tracing::error!(video_id = %video_id, quality = %quality, "MP4 file not found");
        return Err(ApiError::with_code(
            StatusCode::NOT_FOUND,
            "FILE_NOT_FOUND",
            "Video file not found",
        ));
    }

    serve_file(
        path,
        request,
        "video/mp4",
        PLAYLIST_CACHE_CONTROL,
        "Failed to read video file",
    )
    .await
}

/// Serve a media file with range support, overriding content-type and
/// cache headers.
async fn serve_file(
    path: std::path::PathBuf,
    request: Request,
    content_type: &'static str,
    cache_control: &'static str,
    failure_message: &'static str,
) -> Result<Response, ApiError> {
    let served = ServeFile::new(&path)
        .oneshot(request)
        .await
        .map_err(|_| ApiError::internal(failure_message))?;

    let mut response = served.into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache_control));
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    Ok(response)
}
