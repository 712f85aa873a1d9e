//! Video endpoints: upload, listing, metadata, status, deletion.

use super::response::{success, success_list, ApiError, PaginationMeta};
use super::validation::{normalize_pagination, parse_video_id};
use super::AppState;
use crate::application::upload::{NewUpload, UploadError};
use crate::domain::video::{Video, VideoStatus};
use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::BoxError;
use futures::{Stream, TryStreamExt};
use serde::Deserialize;
use serde_json::json;
use std::io;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::BufWriter;
use tokio_util::io::StreamReader;
use uuid::Uuid;

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::FileTooLarge { .. } => ApiError::with_code(
                StatusCode::PAYLOAD_TOO_LARGE,
                "FILE_TOO_LARGE",
                err.to_string(),
            ),
            UploadError::InvalidFormat(_) => {
                ApiError::with_code(StatusCode::BAD_REQUEST, "INVALID_FORMAT", err.to_string())
            }
            UploadError::InvalidTitle(_) | UploadError::InvalidDescription(_) => {
                ApiError::validation(err.to_string())
            }
            UploadError::Repository(e) => {
                tracing::error!("upload repository failure: {}", e);
                ApiError::internal("Failed to upload video")
            }
            UploadError::Io(e) => {
                tracing::error!("upload io failure: {}", e);
                ApiError::internal("Failed to upload video")
            }
        }
    }
}

/// POST /api/videos/upload — multipart `video` + `title` + `description`.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut title = String::new();
    let mut description = String::new();
    let mut spooled: Option<(PathBuf, u64)> = None;
    let mut original_filename = String::new();
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart form data: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("title") => {
                title = field
                    .text()
                    .await
                    .map_err(|_| ApiError::validation("Invalid title field"))?;
            }
            Some("description") => {
                description = field
                    .text()
                    .await
                    .map_err(|_| ApiError::validation("Invalid description field"))?;
            }
            Some("video") => {
                original_filename = field.file_name().unwrap_or_default().to_string();
                content_type = field.content_type().map(|c| c.to_string());

                let spool_dir = state.config.storage.raw_dir();
                tokio::fs::create_dir_all(&spool_dir)
                    .await
                    .map_err(|e| ApiError::internal(format!("Failed to store upload: {}", e)))?;
                let spool_path = spool_dir.join(format!(".upload-{}.part", Uuid::new_v4()));

                let written = stream_to_file(&spool_path, field).await.map_err(|e| {
                    tracing::error!("failed to spool upload: {}", e);
                    ApiError::internal("Failed to store upload")
                })?;
                spooled = Some((spool_path, written));
            }
            _ => {}
        }
    }

    let Some((spooled_path, size)) = spooled else {
        return Err(ApiError::validation("Video file is required"));
    };
    if title.trim().is_empty() {
        let _ = tokio::fs::remove_file(&spooled_path).await;
        return Err(ApiError::validation("Title is required"));
    }

    let video = state
        .uploads
        .upload(NewUpload {
            title,
            description,
            original_filename,
            content_type,
            spooled_path,
            size,
        })
        .await?;

    Ok(success(
        StatusCode::CREATED,
        json!({
            "id": video.id,
            "title": video.title,
            "status": video.status,
            "file_size": video.file_size,
            "duration": video.duration,
            "resolution": video.original_resolution,
            "created_at": video.created_at,
        }),
    ))
}

/// Stream a multipart field to disk, returning the byte count.
async fn stream_to_file<S, E>(path: &PathBuf, stream: S) -> Result<u64, io::Error>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let body_with_io_error = stream.map_err(io::Error::other);
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);

    let mut file = BufWriter::new(File::create(path).await?);
    let written = tokio::io::copy(&mut body_reader, &mut file).await?;
    tokio::io::AsyncWriteExt::flush(&mut file).await?;
    Ok(written)
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub search: Option<String>,
}

/// GET /api/videos?page=&limit=&status=&search=
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let (page, limit) = normalize_pagination(params.page, params.limit);
    let offset = (page - 1) * limit;

    let search = params
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let status = params
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let (videos, total): (Vec<Video>, i64) = if let Some(query) = search {
        let videos = state.repo.search(query, limit, offset).await?;
        let total = state.repo.count_search(query).await?;
        (videos, total)
    } else if let Some(raw) = status {
        let status = VideoStatus::parse(raw)
            .ok_or_else(|| ApiError::validation("Invalid status filter"))?;
        let videos = state.repo.get_by_status(status, limit, offset).await?;
        let total = state.repo.count_by_status(status).await?;
        (videos, total)
    } else {
        let videos = state.repo.list(limit, offset).await?;
        let total = state.repo.count().await?;
        (videos, total)
    };

    Ok(success_list(videos, PaginationMeta::new(total, page, limit)))
}

/// GET /api/videos/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let video_id = parse_video_id(&id)?;
    let video = state.repo.get_by_id(video_id).await?;
    Ok(success(StatusCode::OK, video))
}

/// GET /api/videos/{id}/status
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let video_id = parse_video_id(&id)?;
    let video = state.repo.get_by_id(video_id).await?;

    let mut body = json!({
        "id": video.id,
        "status": video.status,
        "progress": video.transcoding_progress,
        "available_qualities": video.available_qualities,
        "message": video.status_message(),
    });
    if let Some(thumbnail) = &video.thumbnail_path {
        body["thumbnail"] = json!(thumbnail);
    }
    Ok(success(StatusCode::OK, body))
}

/// DELETE /api/videos/{id} — removes the row, then hands disk reclamation
/// to a cleanup job.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let video_id = parse_video_id(&id)?;
    let video = state.repo.get_by_id(video_id).await?;
    state.repo.delete(video_id).await?;

    let mut paths = vec![
        video.file_path.clone(),
        state
            .config
            .storage
            .processed_dir(video_id)
            .to_string_lossy()
            .into_owned(),
        state
            .config
            .storage
            .thumbnail_file(video_id)
            .to_string_lossy()
            .into_owned(),
    ];
    paths.retain(|p| !p.is_empty());

    if let Err(e) = state.queue.enqueue_cleanup(video_id, paths).await {
        tracing::error!(video_id = %video_id, "failed to enqueue cleanup: {}", e);
    }
    if let Err(e) = state.cache.invalidate(video_id).await {
        tracing::warn!(video_id = %video_id, "playlist cache invalidation failed: {}", e);
    }

    Ok(success(
        StatusCode::OK,
        json!({ "message": "Video deleted successfully" }),
    ))
}
