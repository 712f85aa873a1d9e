//! sqlx implementation of the video repository.

use crate::domain::video::{StreamingProtocol, Video, VideoStatus};
use crate::ports::repository::{RepositoryError, VideoRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, title, description, filename, file_path, file_size, mime_type, \
     duration, original_resolution, thumbnail_path, status, transcoding_progress, \
     available_qualities, hls_master_path, hls_ready, streaming_protocol, \
     created_at, updated_at, processed_at";

#[derive(Debug, sqlx::FromRow)]
struct VideoRow {
    id: Uuid,
    title: String,
    description: String,
    filename: String,
    file_path: String,
    file_size: i64,
    mime_type: String,
    duration: i32,
    original_resolution: String,
    thumbnail_path: Option<String>,
    status: String,
    transcoding_progress: i32,
    available_qualities: Vec<String>,
    hls_master_path: Option<String>,
    hls_ready: bool,
    streaming_protocol: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<VideoRow> for Video {
    type Error = RepositoryError;

    fn try_from(row: VideoRow) -> Result<Self, Self::Error> {
        let status = VideoStatus::parse(&row.status).ok_or_else(|| {
            RepositoryError::Backend(format!("unknown video status '{}'", row.status))
        })?;
        let streaming_protocol = match row.streaming_protocol.as_str() {
            "hls" => StreamingProtocol::Hls,
            _ => StreamingProtocol::Progressive,
        };
        Ok(Video {
            id: row.id,
            title: row.title,
            description: row.description,
            filename: row.filename,
            file_path: row.file_path,
            file_size: row.file_size,
            mime_type: row.mime_type,
            duration: row.duration,
            original_resolution: row.original_resolution,
            thumbnail_path: row.thumbnail_path,
            status,
            transcoding_progress: row.transcoding_progress,
            available_qualities: row.available_qualities,
            hls_master_path: row.hls_master_path,
            hls_ready: row.hls_ready,
            streaming_protocol,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
        })
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound,
            other => RepositoryError::Backend(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct PostgresVideoRepository {
    pool: PgPool,
}

impl PostgresVideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn rows_to_videos(rows: Vec<VideoRow>) -> Result<Vec<Video>, RepositoryError> {
        rows.into_iter().map(Video::try_from).collect()
    }

    /// Treat a zero-row UPDATE/DELETE as not-found.
    fn affected(result: sqlx::postgres::PgQueryResult) -> Result<(), RepositoryError> {
        if result.rows_affected() == 0 {
            Err(RepositoryError::NotFound)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VideoRepository for PostgresVideoRepository {
    async fn create(&self, video: &Video) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO videos (
                id, title, description, filename, file_path, file_size, mime_type,
                duration, original_resolution, thumbnail_path, status,
                transcoding_progress, available_qualities, hls_master_path,
                hls_ready, streaming_protocol, created_at, updated_at, processed_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19
            )",
        )
        .bind(video.id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.filename)
        .bind(&video.file_path)
        .bind(video.file_size)
        .bind(&video.mime_type)
        .bind(video.duration)
        .bind(&video.original_resolution)
        .bind(&video.thumbnail_path)
        .bind(video.status.as_str())
        .bind(video.transcoding_progress)
        .bind(&video.available_qualities)
        .bind(&video.hls_master_path)
        .bind(video.hls_ready)
        .bind(video.streaming_protocol.as_str())
        .bind(video.created_at)
        .bind(video.updated_at)
        .bind(video.processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Video, RepositoryError> {
        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "SELECT {} FROM videos WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;
        Video::try_from(row)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Video>, RepositoryError> {
        let rows = sqlx::query_as::<_, VideoRow>(&format!(
            "SELECT {} FROM videos ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            SELECT_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_videos(rows)
    }

    async fn get_by_status(
        &self,
        status: VideoStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Video>, RepositoryError> {
        let rows = sqlx::query_as::<_, VideoRow>(&format!(
            "SELECT {} FROM videos WHERE status = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            SELECT_COLUMNS
        ))
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_videos(rows)
    }

    async fn search(
        &self,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Video>, RepositoryError> {
        let rows = sqlx::query_as::<_, VideoRow>(&format!(
            "SELECT {} FROM videos
             WHERE title ILIKE '%' || $1 || '%' OR description ILIKE '%' || $1 || '%'
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            SELECT_COLUMNS
        ))
        .bind(query)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Self::rows_to_videos(rows)
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM videos")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_by_status(&self, status: VideoStatus) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM videos WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_search(&self, query: &str) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM videos
             WHERE title ILIKE '%' || $1 || '%' OR description ILIKE '%' || $1 || '%'",
        )
        .bind(query)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn update_status(&self, id: Uuid, status: VideoStatus) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE videos SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Self::affected(result)
    }

    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE videos SET transcoding_progress = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(progress)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::affected(result)
    }

    async fn update_duration(&self, id: Uuid, duration: i32) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE videos SET duration = $1, updated_at = NOW() WHERE id = $2")
            .bind(duration)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Self::affected(result)
    }

    async fn update_resolution(&self, id: Uuid, resolution: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE videos SET original_resolution = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(resolution)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::affected(result)
    }

    async fn begin_processing(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE videos
             SET status = 'processing', transcoding_progress = 0, updated_at = NOW()
             WHERE id = $1 AND status IN ('uploading', 'failed')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Zero rows: either the video is gone or it is not in a startable
        // status. Distinguish so callers can fail permanently on the former.
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM videos WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn mark_ready(
        &self,
        id: Uuid,
        qualities: &[String],
        thumbnail_path: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE videos
             SET status = 'ready',
                 available_qualities = $1,
                 thumbnail_path = NULLIF($2, ''),
                 transcoding_progress = 100,
                 processed_at = NOW(),
                 updated_at = NOW()
             WHERE id = $3",
        )
        .bind(qualities)
        .bind(thumbnail_path)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::affected(result)
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("UPDATE videos SET status = 'failed', updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Self::affected(result)
    }

    async fn update_hls(
        &self,
        id: Uuid,
        master_path: &str,
        ready: bool,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE videos
             SET hls_master_path = $1, hls_ready = $2, streaming_protocol = 'hls',
                 updated_at = NOW()
             WHERE id = $3",
        )
        .bind(master_path)
        .bind(ready)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::affected(result)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM videos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Self::affected(result)
    }
}
