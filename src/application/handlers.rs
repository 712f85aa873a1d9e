//! Handlers for the auxiliary job types (`video:thumbnail`,
//! `video:cleanup`). The `video:process` handler is the pipeline itself.

use crate::application::worker::{JobError, JobHandler};
use crate::config::StorageConfig;
use crate::domain::jobs::{CleanupPayload, JobEnvelope, ThumbnailPayload};
use crate::media::thumbnail::thumbnail_seek;
use crate::media::{MediaProcessor, ThumbnailError};
use crate::ports::repository::{RepositoryError, VideoRepository};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Regenerates a video's thumbnail at its deterministic path.
pub struct ThumbnailHandler<R, M> {
    repo: Arc<R>,
    media: Arc<M>,
    storage: StorageConfig,
}

impl<R, M> ThumbnailHandler<R, M>
where
    R: VideoRepository,
    M: MediaProcessor,
{
    pub fn new(repo: Arc<R>, media: Arc<M>, storage: StorageConfig) -> Self {
        Self {
            repo,
            media,
            storage,
        }
    }
}

#[async_trait]
impl<R, M> JobHandler for ThumbnailHandler<R, M>
where
    R: VideoRepository,
    M: MediaProcessor,
{
    async fn handle(&self, job: &JobEnvelope, cancel: CancellationToken) -> Result<(), JobError> {
        let payload: ThumbnailPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::permanent(format!("failed to parse payload: {}", e)))?;

        let video = self
            .repo
            .get_by_id(payload.video_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => JobError::permanent("video not found"),
                other => JobError::retryable(other.to_string()),
            })?;

        let source = PathBuf::from(&video.file_path);
        let dest = self.storage.thumbnail_file(video.id);
        let seek = thumbnail_seek(video.duration as f64);

        self.media
            .thumbnail(&source, &dest, seek, &cancel)
            .await
            .map_err(|e| match e {
                ThumbnailError::Cancelled => JobError::retryable("thumbnail cancelled"),
                other => JobError::retryable(other.to_string()),
            })?;

        tracing::info!(video_id = %video.id, path = %dest.display(), "thumbnail generated");
        Ok(())
    }
}

/// Removes derived artifacts after a video row is deleted.
pub struct CleanupHandler {
    storage: StorageConfig,
}

impl CleanupHandler {
    pub fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }

    async fn remove(&self, path: &Path) -> std::io::Result<()> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            // Already gone: cleanup is idempotent
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl JobHandler for CleanupHandler {
    async fn handle(&self, job: &JobEnvelope, _cancel: CancellationToken) -> Result<(), JobError> {
        let payload: CleanupPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::permanent(format!("failed to parse payload: {}", e)))?;

        let mut failures = 0;
        for raw in &payload.paths {
            let path = PathBuf::from(raw);
            if !self.storage.owns(&path) {
                tracing::warn!(
                    video_id = %payload.video_id,
                    path = %path.display(),
                    "refusing to clean path outside the media tree"
                );
                continue;
            }
            if let Err(e) = self.remove(&path).await {
                tracing::error!(
                    video_id = %payload.video_id,
                    path = %path.display(),
                    "cleanup failed: {}",
                    e
                );
                failures += 1;
            }
        }

        if failures > 0 {
            return Err(JobError::retryable(format!(
                "{} of {} paths could not be removed",
                failures,
                payload.paths.len()
            )));
        }
        tracing::info!(video_id = %payload.video_id, paths = payload.paths.len(), "cleanup completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::jobs::{QueueTier, TYPE_CLEANUP};
    use tempfile::tempdir;
    use uuid::Uuid;

    fn storage(root: &Path) -> StorageConfig {
        StorageConfig {
            upload_path: root.to_path_buf(),
            max_file_size: 1024,
            thumbnail_path: root.join("thumbnails"),
            transcoded_path: root.join("processed"),
            allowed_formats: vec![],
        }
    }

    fn cleanup_job(video_id: Uuid, paths: Vec<String>) -> JobEnvelope {
        JobEnvelope::new(
            TYPE_CLEANUP,
            QueueTier::Default,
            serde_json::to_value(CleanupPayload { video_id, paths }).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_cleanup_removes_files_and_dirs() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("raw");
        tokio::fs::create_dir_all(&raw).await.unwrap();
        let file = raw.join("a.mp4");
        tokio::fs::write(&file, b"x").await.unwrap();
        let derived = dir.path().join("processed").join("vid");
        tokio::fs::create_dir_all(derived.join("hls")).await.unwrap();

        let handler = CleanupHandler::new(storage(dir.path()));
        let job = cleanup_job(
            Uuid::new_v4(),
            vec![
                file.to_string_lossy().into_owned(),
                derived.to_string_lossy().into_owned(),
            ],
        );
        handler.handle(&job, CancellationToken::new()).await.unwrap();
        assert!(!file.exists());
        assert!(!derived.exists());
    }

    #[tokio::test]
    async fn test_cleanup_skips_foreign_paths() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let victim = outside.path().join("precious.txt");
        tokio::fs::write(&victim, b"keep me").await.unwrap();

        let handler = CleanupHandler::new(storage(dir.path()));
        let job = cleanup_job(Uuid::new_v4(), vec![victim.to_string_lossy().into_owned()]);
        handler.handle(&job, CancellationToken::new()).await.unwrap();
        assert!(victim.exists());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("raw").join("missing.mp4");
        let handler = CleanupHandler::new(storage(dir.path()));
        let job = cleanup_job(Uuid::new_v4(), vec![gone.to_string_lossy().into_owned()]);
        handler.handle(&job, CancellationToken::new()).await.unwrap();
    }
}
