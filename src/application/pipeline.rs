//! The video processing pipeline: probe, per-quality transcode, HLS
//! packaging, master manifest, thumbnail, terminal status.
//!
//! All outputs land at deterministic paths, so a re-run after a crash
//! overwrites in place and the compare-and-set status transition keeps two
//! attempts for the same video from running concurrently.

use crate::config::StorageConfig;
use crate::domain::jobs::{JobEnvelope, VideoProcessingPayload};
use crate::domain::quality::find_quality;
use crate::media::{write_master, MediaProcessor, PackageError, ProbeError, TranscodeError};
use crate::media::thumbnail::thumbnail_seek;
use crate::ports::repository::{RepositoryError, VideoRepository};
use crate::application::worker::{JobError, JobHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug)]
pub enum PipelineError {
    VideoNotFound(Uuid),
    /// Another attempt holds the video; the worker must not retry
    AlreadyInProgress(Uuid),
    Probe(ProbeError),
    /// Every requested quality failed to transcode
    NoQualitiesProduced(Uuid),
    Repository(RepositoryError),
    Io(String),
    Cancelled,
}

impl PipelineError {
    /// Permanent errors are archived instead of retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PipelineError::VideoNotFound(_)
                | PipelineError::AlreadyInProgress(_)
                | PipelineError::Repository(RepositoryError::NotFound)
        )
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::VideoNotFound(id) => write!(f, "video {} not found", id),
            PipelineError::AlreadyInProgress(id) => {
                write!(f, "video {} is already being processed", id)
            }
            PipelineError::Probe(e) => write!(f, "probe failed: {}", e),
            PipelineError::NoQualitiesProduced(id) => {
                write!(f, "failed to transcode any quality for video {}", id)
            }
            PipelineError::Repository(e) => write!(f, "repository error: {}", e),
            PipelineError::Io(e) => write!(f, "io error: {}", e),
            PipelineError::Cancelled => write!(f, "processing cancelled"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<RepositoryError> for PipelineError {
    fn from(err: RepositoryError) -> Self {
        PipelineError::Repository(err)
    }
}

impl From<PipelineError> for JobError {
    fn from(err: PipelineError) -> Self {
        if err.is_permanent() {
            JobError::permanent(err.to_string())
        } else {
            JobError::retryable(err.to_string())
        }
    }
}

pub struct ProcessVideoPipeline<R, M> {
    repo: Arc<R>,
    media: Arc<M>,
    storage: StorageConfig,
}

impl<R, M> ProcessVideoPipeline<R, M>
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

    pub async fn process(
        &self,
        payload: &VideoProcessingPayload,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let id = payload.video_id;
        tracing::info!(video_id = %id, qualities = ?payload.qualities, "starting video processing");

        let video = self.repo.get_by_id(id).await.map_err(|e| match e {
            RepositoryError::NotFound => PipelineError::VideoNotFound(id),
            other => PipelineError::Repository(other),
        })?;

        // Claims the video: uploading|failed -> processing with progress 0.
        let claimed = self.repo.begin_processing(id).await.map_err(|e| match e {
            RepositoryError::NotFound => PipelineError::VideoNotFound(id),
            other => PipelineError::Repository(other),
        })?;
        if !claimed {
            tracing::warn!(video_id = %id, status = %video.status, "video is not in a startable status");
            return Err(PipelineError::AlreadyInProgress(id));
        }

        let source = std::path::PathBuf::from(&video.file_path);
        let info = match self.media.probe(&source, cancel).await {
            Ok(info) => info,
            Err(ProbeError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::error!(video_id = %id, "failed to extract metadata: {}", e);
                self.try_mark_failed(id).await;
                return Err(PipelineError::Probe(e));
            }
        };

        if let Err(e) = self.repo.update_duration(id, info.duration_seconds as i32).await {
            tracing::error!(video_id = %id, "failed to update duration: {}", e);
        }
        let resolution = format!("{}x{}", info.width, info.height);
        if let Err(e) = self.repo.update_resolution(id, &resolution).await {
            tracing::error!(video_id = %id, "failed to update resolution: {}", e);
        }

        let output_dir = self.storage.processed_dir(id);
        if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
            self.try_mark_failed(id).await;
            return Err(PipelineError::Io(format!(
                "failed to create output directory: {}",
                e
            )));
        }

        // Transcode stage. Steps: one per requested quality, then HLS
        // packaging, then thumbnail.
        let total_steps = payload.qualities.len() + 2;
        let mut transcoded: Vec<String> = Vec::new();

        for (step, name) in payload.qualities.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let Some(spec) = find_quality(name) else {
                tracing::warn!(video_id = %id, quality = %name, "unknown quality requested");
                self.bump_progress(id, step + 1, total_steps).await;
                continue;
            };

            if info.height < spec.height {
                tracing::info!(
                    video_id = %id,
                    quality = spec.name,
                    original_height = info.height,
                    target_height = spec.height,
                    "skipping quality (would upscale)"
                );
                self.bump_progress(id, step + 1, total_steps).await;
                continue;
            }

            let dest = self.storage.mp4_path(id, spec.name);
            match self.media.transcode(&source, &dest, spec, cancel).await {
                Ok(()) => {
                    transcoded.push(spec.name.to_string());
                    tracing::info!(video_id = %id, quality = spec.name, "transcoded quality successfully");
                }
                Err(TranscodeError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    tracing::error!(video_id = %id, quality = spec.name, "failed to transcode quality: {}", e);
                }
            }
            self.bump_progress(id, step + 1, total_steps).await;
        }

        if transcoded.is_empty() {
            self.try_mark_failed(id).await;
            return Err(PipelineError::NoQualitiesProduced(id));
        }

        // HLS stage: segment every produced quality; individual failures
        // drop the variant, not the video.
        let mut hls_qualities: Vec<String> = Vec::new();
        for quality in &transcoded {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let mp4 = self.storage.mp4_path(id, quality);
            let variant_dir = self.storage.variant_dir(id, quality);
            match self.media.package_variant(&mp4, &variant_dir, cancel).await {
                Ok(output) => {
                    tracing::info!(
                        video_id = %id,
                        quality = %quality,
                        segments = output.segment_count,
                        "packaged hls variant"
                    );
                    hls_qualities.push(quality.clone());
                }
                Err(PackageError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    tracing::error!(video_id = %id, quality = %quality, "failed to package hls variant: {}", e);
                }
            }
        }
        self.bump_progress(id, payload.qualities.len() + 1, total_steps)
            .await;

        if !hls_qualities.is_empty() {
            let hls_dir = self.storage.hls_dir(id);
            match write_master(&hls_dir, &hls_qualities).await {
                Ok((master_path, listed)) => {
                    let master = master_path.to_string_lossy();
                    if let Err(e) = self.repo.update_hls(id, &master, true).await {
                        tracing::error!(video_id = %id, "failed to update hls info: {}", e);
                    } else {
                        tracing::info!(video_id = %id, variants = ?listed, "master manifest written");
                    }
                }
                Err(e) => {
                    tracing::error!(video_id = %id, "failed to write master manifest: {}", e);
                }
            }
        }

        // Thumbnail stage; failure leaves the record without a thumbnail.
        let thumbnail_rel = match self.generate_thumbnail(id, &source, info.duration_seconds, cancel).await {
            Ok(rel) => rel,
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                tracing::error!(video_id = %id, "failed to generate thumbnail: {}", e);
                String::new()
            }
        };

        self.repo
            .mark_ready(id, &transcoded, &thumbnail_rel)
            .await?;

        tracing::info!(video_id = %id, qualities = ?transcoded, "video processing completed");
        Ok(())
    }

    async fn generate_thumbnail(
        &self,
        id: Uuid,
        source: &std::path::Path,
        duration: f64,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let dest = self.storage.thumbnail_file(id);
        let seek = thumbnail_seek(duration);
        match self.media.thumbnail(source, &dest, seek, cancel).await {
            Ok(()) => Ok(format!("thumbnails/{}.jpg", id)),
            Err(crate::media::ThumbnailError::Cancelled) => Err(PipelineError::Cancelled),
            Err(e) => Err(PipelineError::Io(e.to_string())),
        }
    }

    /// Progress after `completed` of `total` steps; floor division keeps it
    /// under 100 until `mark_ready` pins the final value.
    async fn bump_progress(&self, id: Uuid, completed: usize, total: usize) {
        let progress = (completed * 100 / total) as i32;
        if let Err(e) = self.repo.update_progress(id, progress).await {
            tracing::error!(video_id = %id, progress, "failed to update progress: {}", e);
        }
    }

    async fn try_mark_failed(&self, id: Uuid) {
        if let Err(e) = self.repo.mark_failed(id).await {
            tracing::error!(video_id = %id, "failed to mark video as failed: {}", e);
        }
    }
}

#[async_trait]
impl<R, M> JobHandler for ProcessVideoPipeline<R, M>
where
    R: VideoRepository,
    M: MediaProcessor,
{
    async fn handle(&self, job: &JobEnvelope, cancel: CancellationToken) -> Result<(), JobError> {
        let payload: VideoProcessingPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::permanent(format!("failed to parse payload: {}", e)))?;
        self.process(&payload, &cancel).await.map_err(JobError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quality::all_quality_names;
    use crate::domain::video::{StreamingProtocol, Video, VideoStatus};
    use crate::media::{MediaInfo, MockMediaProcessor, VariantOutput};
    use crate::ports::repository::MockVideoRepository;
    use chrono::Utc;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn test_video(id: Uuid, status: VideoStatus) -> Video {
        Video {
            id,
            title: "Clip".to_string(),
            description: String::new(),
            filename: "clip.mp4".to_string(),
            file_path: "/uploads/raw/clip.mp4".to_string(),
            file_size: 1024,
            mime_type: "video/mp4".to_string(),
            duration: 0,
            original_resolution: String::new(),
            thumbnail_path: None,
            status,
            transcoding_progress: 0,
            available_qualities: Vec::new(),
            hls_master_path: None,
            hls_ready: false,
            streaming_protocol: StreamingProtocol::Progressive,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            processed_at: None,
        }
    }

    fn info(width: u32, height: u32, duration: f64) -> MediaInfo {
        MediaInfo {
            duration_seconds: duration,
            width,
            height,
            frame_rate: 30.0,
            bitrate_bps: 2_000_000,
            video_codec: "h264".to_string(),
            audio_codec: "aac".to_string(),
            container: "mp4".to_string(),
        }
    }

    fn storage(root: &Path) -> StorageConfig {
        StorageConfig {
            upload_path: root.to_path_buf(),
            max_file_size: u64::MAX,
            thumbnail_path: root.join("thumbnails"),
            transcoded_path: root.join("processed"),
            allowed_formats: vec![],
        }
    }

    fn payload(id: Uuid) -> VideoProcessingPayload {
        VideoProcessingPayload {
            video_id: id,
            qualities: all_quality_names(),
            priority: 0,
        }
    }

    fn permissive_repo(id: Uuid) -> MockVideoRepository {
        let mut repo = MockVideoRepository::new();
        repo.expect_get_by_id()
            .returning(move |_| Ok(test_video(id, VideoStatus::Uploading)));
        repo.expect_begin_processing().returning(|_| Ok(true));
        repo.expect_update_duration().returning(|_, _| Ok(()));
        repo.expect_update_resolution().returning(|_, _| Ok(()));
        repo.expect_update_progress().returning(|_, _| Ok(()));
        repo
    }

    /// Mock packager that actually lays the variant playlist down so the
    /// master writer picks it up.
    fn working_packager(media: &mut MockMediaProcessor) {
        media.expect_package_variant().returning(|_, out_dir, _| {
            std::fs::create_dir_all(out_dir).unwrap();
            std::fs::write(out_dir.join("playlist.m3u8"), "#EXTM3U\n").unwrap();
            std::fs::write(out_dir.join("segment_000.ts"), b"ts").unwrap();
            Ok(VariantOutput {
                playlist_path: out_dir.join("playlist.m3u8"),
                segment_count: 1,
            })
        });
    }

    #[tokio::test]
    async fn test_upscale_guard_produces_only_lowest_quality() {
        let dir = tempdir().unwrap();
        let id = Uuid::new_v4();

        let mut repo = permissive_repo(id);
        repo.expect_update_hls()
            .withf(|_, path, ready| path.ends_with("master.m3u8") && *ready)
            .times(1)
            .returning(|_, _, _| Ok(()));
        repo.expect_mark_ready()
            .withf(|_, qualities, _| qualities.len() == 1 && qualities[0] == "360p")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut media = MockMediaProcessor::new();
        media
            .expect_probe()
            .returning(|_, _| Ok(info(640, 360, 30.0)));
        // source is 360 tall: only 360p may be transcoded
        media
            .expect_transcode()
            .withf(|_, _, spec, _| spec.name == "360p")
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        working_packager(&mut media);
        media.expect_thumbnail().returning(|_, _, _, _| Ok(()));

        let pipeline =
            ProcessVideoPipeline::new(Arc::new(repo), Arc::new(media), storage(dir.path()));
        pipeline
            .process(&payload(id), &CancellationToken::new())
            .await
            .unwrap();

        let master = tokio::fs::read_to_string(dir.path().join("processed").join(id.to_string()).join("hls/master.m3u8"))
            .await
            .unwrap();
        assert_eq!(master.matches("EXT-X-STREAM-INF").count(), 1);
        assert!(master.contains("BANDWIDTH=800000,RESOLUTION=640x360"));
    }

    #[tokio::test]
    async fn test_all_transcodes_failing_marks_video_failed() {
        let dir = tempdir().unwrap();
        let id = Uuid::new_v4();

        let mut repo = permissive_repo(id);
        repo.expect_mark_failed().times(1).returning(|_| Ok(()));

        let mut media = MockMediaProcessor::new();
        media
            .expect_probe()
            .returning(|_, _| Ok(info(1920, 1080, 60.0)));
        media.expect_transcode().times(4).returning(|_, _, spec, _| {
            Err(TranscodeError::Tool {
                quality: spec.name,
                stderr_tail: "boom".to_string(),
            })
        });

        let pipeline =
            ProcessVideoPipeline::new(Arc::new(repo), Arc::new(media), storage(dir.path()));
        let err = pipeline
            .process(&payload(id), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoQualitiesProduced(_)));
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn test_probe_failure_marks_video_failed() {
        let dir = tempdir().unwrap();
        let id = Uuid::new_v4();

        let mut repo = MockVideoRepository::new();
        repo.expect_get_by_id()
            .returning(move |_| Ok(test_video(id, VideoStatus::Uploading)));
        repo.expect_begin_processing().returning(|_| Ok(true));
        repo.expect_mark_failed().times(1).returning(|_| Ok(()));

        let mut media = MockMediaProcessor::new();
        media
            .expect_probe()
            .returning(|_, _| Err(ProbeError::NoVideoStream));

        let pipeline =
            ProcessVideoPipeline::new(Arc::new(repo), Arc::new(media), storage(dir.path()));
        let err = pipeline
            .process(&payload(id), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Probe(_)));
    }

    #[tokio::test]
    async fn test_already_in_progress_is_permanent() {
        let dir = tempdir().unwrap();
        let id = Uuid::new_v4();

        let mut repo = MockVideoRepository::new();
        repo.expect_get_by_id()
            .returning(move |_| Ok(test_video(id, VideoStatus::Processing)));
        repo.expect_begin_processing().returning(|_| Ok(false));

        let media = MockMediaProcessor::new();
        let pipeline =
            ProcessVideoPipeline::new(Arc::new(repo), Arc::new(media), storage(dir.path()));
        let err = pipeline
            .process(&payload(id), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyInProgress(_)));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_missing_video_is_permanent() {
        let dir = tempdir().unwrap();
        let mut repo = MockVideoRepository::new();
        repo.expect_get_by_id()
            .returning(|_| Err(RepositoryError::NotFound));

        let pipeline = ProcessVideoPipeline::new(
            Arc::new(repo),
            Arc::new(MockMediaProcessor::new()),
            storage(dir.path()),
        );
        let err = pipeline
            .process(&payload(Uuid::new_v4()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::VideoNotFound(_)));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_progress_is_monotone_and_thumbnail_failure_non_fatal() {
        let dir = tempdir().unwrap();
        let id = Uuid::new_v4();
        let seen = Arc::new(Mutex::new(Vec::<i32>::new()));

        let mut repo = MockVideoRepository::new();
        repo.expect_get_by_id()
            .returning(move |_| Ok(test_video(id, VideoStatus::Failed)));
        repo.expect_begin_processing().returning(|_| Ok(true));
        repo.expect_update_duration().returning(|_, _| Ok(()));
        repo.expect_update_resolution().returning(|_, _| Ok(()));
        let seen_progress = seen.clone();
        repo.expect_update_progress().returning(move |_, p| {
            seen_progress.lock().unwrap().push(p);
            Ok(())
        });
        repo.expect_update_hls().returning(|_, _, _| Ok(()));
        repo.expect_mark_ready()
            .withf(|_, _, thumb| thumb.is_empty())
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut media = MockMediaProcessor::new();
        media
            .expect_probe()
            .returning(|_, _| Ok(info(1920, 1080, 300.0)));
        media.expect_transcode().returning(|_, _, _, _| Ok(()));
        working_packager(&mut media);
        media.expect_thumbnail().returning(|_, _, _, _| {
            Err(crate::media::ThumbnailError::Tool {
                stderr_tail: "no jpeg encoder".to_string(),
            })
        });

        let pipeline =
            ProcessVideoPipeline::new(Arc::new(repo), Arc::new(media), storage(dir.path()));
        pipeline
            .process(&payload(id), &CancellationToken::new())
            .await
            .unwrap();

        let progress = seen.lock().unwrap().clone();
        // 4 qualities + hls stage over 6 steps: 16, 33, 50, 66, 83
        assert_eq!(progress, vec![16, 33, 50, 66, 83]);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let dir = tempdir().unwrap();
        let id = Uuid::new_v4();

        let mut repo = permissive_repo(id);
        repo.expect_mark_failed().never();

        let mut media = MockMediaProcessor::new();
        media
            .expect_probe()
            .returning(|_, _| Ok(info(1920, 1080, 60.0)));
        media
            .expect_transcode()
            .returning(|_, _, _, _| Err(TranscodeError::Cancelled));

        let pipeline =
            ProcessVideoPipeline::new(Arc::new(repo), Arc::new(media), storage(dir.path()));
        let err = pipeline
            .process(&payload(id), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(!err.is_permanent());
    }
}
