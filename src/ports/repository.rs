//! Durable video record storage.

use crate::domain::video::{Video, VideoStatus};
use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

#[derive(Debug)]
pub enum RepositoryError {
    /// Record absent; maps to a 404 at the API surface
    NotFound,
    Backend(String),
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::NotFound => write!(f, "video not found"),
            RepositoryError::Backend(e) => write!(f, "repository error: {}", e),
        }
    }
}

impl std::error::Error for RepositoryError {}

/// Every mutation also refreshes the record's `updated_at`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn create(&self, video: &Video) -> Result<(), RepositoryError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Video, RepositoryError>;

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Video>, RepositoryError>;

    async fn get_by_status(
        &self,
        status: VideoStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Video>, RepositoryError>;

    /// Case-insensitive substring match over title and description.
    async fn search(
        &self,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Video>, RepositoryError>;

    async fn count(&self) -> Result<i64, RepositoryError>;

    async fn count_by_status(&self, status: VideoStatus) -> Result<i64, RepositoryError>;

    async fn count_search(&self, query: &str) -> Result<i64, RepositoryError>;

    async fn update_status(&self, id: Uuid, status: VideoStatus) -> Result<(), RepositoryError>;

    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<(), RepositoryError>;

    async fn update_duration(&self, id: Uuid, duration: i32) -> Result<(), RepositoryError>;

    async fn update_resolution(&self, id: Uuid, resolution: &str) -> Result<(), RepositoryError>;

    /// Compare-and-set transition into `processing` with progress reset to 0.
    /// Succeeds only from `uploading` or `failed`, which is what keeps two
    /// concurrent attempts for the same video from both proceeding.
    async fn begin_processing(&self, id: Uuid) -> Result<bool, RepositoryError>;

    async fn mark_ready(
        &self,
        id: Uuid,
        qualities: &[String],
        thumbnail_path: &str,
    ) -> Result<(), RepositoryError>;

    async fn mark_failed(&self, id: Uuid) -> Result<(), RepositoryError>;

    async fn update_hls(
        &self,
        id: Uuid,
        master_path: &str,
        ready: bool,
    ) -> Result<(), RepositoryError>;

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;
}
