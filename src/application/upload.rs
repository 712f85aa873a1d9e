//! Upload intake: validate, store the raw file, create the record, enqueue
//! processing.

use crate::config::StorageConfig;
use crate::domain::video::{Video, MAX_DESCRIPTION_LEN, MAX_TITLE_LEN};
use crate::media::MediaProcessor;
use crate::ports::queue::JobQueue;
use crate::ports::repository::{RepositoryError, VideoRepository};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Smallest byte count we accept as a plausible video file.
const MIN_FILE_SIZE: u64 = 1024;
/// Bytes sniffed for the container signature.
const MAGIC_PROBE_LEN: usize = 512;

const ALLOWED_EXTENSIONS: [&str; 5] = [".mp4", ".mov", ".avi", ".mkv", ".webm"];

/// A fully spooled multipart upload, handed over by the HTTP layer.
#[derive(Debug)]
pub struct NewUpload {
    pub title: String,
    pub description: String,
    pub original_filename: String,
    pub content_type: Option<String>,
    /// Temp file the body was streamed into; the service owns it from here
    pub spooled_path: PathBuf,
    pub size: u64,
}

#[derive(Debug)]
pub enum UploadError {
    InvalidTitle(String),
    InvalidDescription(String),
    FileTooLarge { size: u64, max: u64 },
    InvalidFormat(String),
    Repository(RepositoryError),
    Io(String),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::InvalidTitle(m) => write!(f, "{}", m),
            UploadError::InvalidDescription(m) => write!(f, "{}", m),
            UploadError::FileTooLarge { size, max } => {
                write!(f, "file is {} bytes, maximum is {} bytes", size, max)
            }
            UploadError::InvalidFormat(m) => write!(f, "{}", m),
            UploadError::Repository(e) => write!(f, "failed to save video metadata: {}", e),
            UploadError::Io(e) => write!(f, "failed to store upload: {}", e),
        }
    }
}

impl std::error::Error for UploadError {}

pub struct UploadService {
    repo: Arc<dyn VideoRepository>,
    queue: Arc<dyn JobQueue>,
    media: Arc<dyn MediaProcessor>,
    storage: StorageConfig,
}

impl UploadService {
    pub fn new(
        repo: Arc<dyn VideoRepository>,
        queue: Arc<dyn JobQueue>,
        media: Arc<dyn MediaProcessor>,
        storage: StorageConfig,
    ) -> Self {
        Self {
            repo,
            queue,
            media,
            storage,
        }
    }

    /// Validate and commit an upload. The spooled file is either renamed
    /// into the raw tree or removed; it never outlives this call.
    pub async fn upload(&self, new: NewUpload) -> Result<Video, UploadError> {
        match self.accept(&new).await {
            Ok(video) => Ok(video),
            Err(err) => {
                let _ = tokio::fs::remove_file(&new.spooled_path).await;
                Err(err)
            }
        }
    }

    async fn accept(&self, new: &NewUpload) -> Result<Video, UploadError> {
        let title = new.title.trim().to_string();
        let description = new.description.trim().to_string();
        validate_title(&title)?;
        validate_description(&description)?;

        let ext = file_extension(&new.original_filename).ok_or_else(|| {
            UploadError::InvalidFormat("only mp4, mov, avi, mkv, webm are allowed".to_string())
        })?;

        if new.size > self.storage.max_file_size {
            return Err(UploadError::FileTooLarge {
                size: new.size,
                max: self.storage.max_file_size,
            });
        }
        if new.size < MIN_FILE_SIZE {
            return Err(UploadError::InvalidFormat(
                "file is too small to be a valid video".to_string(),
            ));
        }

        let written = tokio::fs::metadata(&new.spooled_path)
            .await
            .map_err(|e| UploadError::Io(e.to_string()))?
            .len();
        if written != new.size {
            return Err(UploadError::Io(format!(
                "file size mismatch: expected {}, got {}",
                new.size, written
            )));
        }

        let head = read_head(&new.spooled_path, MAGIC_PROBE_LEN)
            .await
            .map_err(|e| UploadError::Io(e.to_string()))?;
        if !is_video_file(&head) {
            return Err(UploadError::InvalidFormat(
                "file content does not match video format".to_string(),
            ));
        }

        let mime_type = new
            .content_type
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| format!("video/{}", ext.trim_start_matches('.')));

        let mut video = Video::new(
            title,
            description,
            new.original_filename.clone(),
            String::new(),
            new.size as i64,
            mime_type,
        )
        .map_err(|e| UploadError::InvalidTitle(e.to_string()))?;

        let final_path = self.storage.raw_path(video.id, &ext);
        tokio::fs::create_dir_all(self.storage.raw_dir())
            .await
            .map_err(|e| UploadError::Io(e.to_string()))?;
        tokio::fs::rename(&new.spooled_path, &final_path)
            .await
            .map_err(|e| UploadError::Io(e.to_string()))?;
        video.filename = format!("{}{}", video.id, ext);
        video.file_path = final_path.to_string_lossy().into_owned();

        // Best-effort probe so the record carries duration/resolution right
        // away; processing re-probes anyway.
        match self.media.probe(&final_path, &CancellationToken::new()).await {
            Ok(info) => {
                video.duration = info.duration_seconds as i32;
                video.original_resolution = format!("{}x{}", info.width, info.height);
            }
            Err(e) => {
                tracing::warn!(video_id = %video.id, "upload-time probe failed: {}", e);
            }
        }

        if let Err(e) = self.repo.create(&video).await {
            let _ = tokio::fs::remove_file(&final_path).await;
            return Err(UploadError::Repository(e));
        }

        if let Err(e) = self
            .queue
            .enqueue_video_processing(video.id, 0)
            .await
        {
            tracing::error!(video_id = %video.id, "failed to enqueue video processing: {}", e);
        }

        tracing::info!(
            video_id = %video.id,
            title = %video.title,
            size = video.file_size,
            "video upload completed"
        );

        Ok(video)
    }
}

fn validate_title(title: &str) -> Result<(), UploadError> {
    if title.is_empty() {
        return Err(UploadError::InvalidTitle(
            "title cannot be empty".to_string(),
        ));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(UploadError::InvalidTitle(format!(
            "title cannot exceed {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), UploadError> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(UploadError::InvalidDescription(format!(
            "description cannot exceed {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    Ok(())
}

/// Lower-cased extension including the dot, when it is an allowed one.
fn file_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))?;
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

async fn read_head(path: &Path, limit: usize) -> std::io::Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; limit];
    let mut read = 0;
    while read < limit {
        let n = file.read(&mut buf[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
    }
    buf.truncate(read);
    Ok(buf)
}

/// Container signature check over the sniffed head: MP4/MOV (`ftyp` box),
/// WebM/MKV (EBML), AVI (RIFF).
fn is_video_file(head: &[u8]) -> bool {
    if head.len() >= 8 && &head[4..8] == b"ftyp" {
        return true;
    }
    if head.len() >= 4 && head[..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return true;
    }
    if head.len() >= 4 && &head[..4] == b"RIFF" {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaInfo, MockMediaProcessor, ProbeError};
    use crate::ports::queue::MockJobQueue;
    use crate::ports::repository::MockVideoRepository;
    use tempfile::tempdir;

    fn mp4_head() -> Vec<u8> {
        let mut head = vec![0x00, 0x00, 0x00, 0x18];
        head.extend_from_slice(b"ftypisom");
        head.resize(2048, 0);
        head
    }

    fn storage(root: &Path) -> StorageConfig {
        StorageConfig {
            upload_path: root.to_path_buf(),
            max_file_size: 10 * 1024 * 1024,
            thumbnail_path: root.join("thumbnails"),
            transcoded_path: root.join("processed"),
            allowed_formats: vec!["video/mp4".to_string()],
        }
    }

    async fn spool(dir: &Path, contents: &[u8]) -> PathBuf {
        let path = dir.join(".spool-test");
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    fn new_upload(spooled: PathBuf, size: u64) -> NewUpload {
        NewUpload {
            title: "Intro".to_string(),
            description: String::new(),
            original_filename: "intro.mp4".to_string(),
            content_type: Some("video/mp4".to_string()),
            spooled_path: spooled,
            size,
        }
    }

    #[test]
    fn test_magic_bytes() {
        assert!(is_video_file(&mp4_head()));
        assert!(is_video_file(&[0x1A, 0x45, 0xDF, 0xA3, 0x00]));
        assert!(is_video_file(b"RIFFxxxxAVI LIST"));
        assert!(!is_video_file(b"<!DOCTYPE html>"));
        assert!(!is_video_file(b"\x00\x00"));
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("a.MP4"), Some(".mp4".to_string()));
        assert_eq!(file_extension("clip.webm"), Some(".webm".to_string()));
        assert_eq!(file_extension("evil.exe"), None);
        assert_eq!(file_extension("noext"), None);
    }

    #[tokio::test]
    async fn test_upload_happy_path() {
        let dir = tempdir().unwrap();
        let spooled = spool(dir.path(), &mp4_head()).await;
        let size = mp4_head().len() as u64;

        let mut repo = MockVideoRepository::new();
        repo.expect_create().times(1).returning(|v| {
            assert_eq!(v.title, "Intro");
            assert_eq!(v.duration, 120);
            assert_eq!(v.original_resolution, "1920x1080");
            Ok(())
        });

        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue_video_processing()
            .withf(|_, priority| *priority == 0)
            .times(1)
            .returning(|_, _| Ok("task-1".to_string()));

        let mut media = MockMediaProcessor::new();
        media.expect_probe().times(1).returning(|_, _| {
            Ok(MediaInfo {
                duration_seconds: 120.7,
                width: 1920,
                height: 1080,
                frame_rate: 30.0,
                bitrate_bps: 4_000_000,
                video_codec: "h264".to_string(),
                audio_codec: "aac".to_string(),
                container: "mp4".to_string(),
            })
        });

        let service = UploadService::new(
            Arc::new(repo),
            Arc::new(queue),
            Arc::new(media),
            storage(dir.path()),
        );

        let video = service.upload(new_upload(spooled, size)).await.unwrap();
        assert_eq!(video.file_size as u64, size);
        assert!(PathBuf::from(&video.file_path).exists());
        assert!(video.file_path.ends_with(&format!("{}.mp4", video.id)));
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_extension() {
        let dir = tempdir().unwrap();
        let spooled = spool(dir.path(), &mp4_head()).await;
        let size = mp4_head().len() as u64;

        let service = UploadService::new(
            Arc::new(MockVideoRepository::new()),
            Arc::new(MockJobQueue::new()),
            Arc::new(MockMediaProcessor::new()),
            storage(dir.path()),
        );

        let mut upload = new_upload(spooled.clone(), size);
        upload.original_filename = "intro.exe".to_string();
        let err = service.upload(upload).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidFormat(_)));
        // spool cleaned up on rejection
        assert!(!spooled.exists());
    }

    #[tokio::test]
    async fn test_upload_rejects_oversize() {
        let dir = tempdir().unwrap();
        let spooled = spool(dir.path(), &mp4_head()).await;

        let mut cfg = storage(dir.path());
        cfg.max_file_size = 100;
        let service = UploadService::new(
            Arc::new(MockVideoRepository::new()),
            Arc::new(MockJobQueue::new()),
            Arc::new(MockMediaProcessor::new()),
            cfg,
        );

        let err = service
            .upload(new_upload(spooled, mp4_head().len() as u64))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::FileTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_upload_rejects_wrong_magic() {
        let dir = tempdir().unwrap();
        let mut body = b"<!DOCTYPE html>".to_vec();
        body.resize(4096, b'x');
        let spooled = spool(dir.path(), &body).await;

        let service = UploadService::new(
            Arc::new(MockVideoRepository::new()),
            Arc::new(MockJobQueue::new()),
            Arc::new(MockMediaProcessor::new()),
            storage(dir.path()),
        );

        let err = service
            .upload(new_upload(spooled, body.len() as u64))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidFormat(_)));
    }

    #[tokio::test]
    async fn test_upload_survives_probe_failure() {
        let dir = tempdir().unwrap();
        let spooled = spool(dir.path(), &mp4_head()).await;
        let size = mp4_head().len() as u64;

        let mut repo = MockVideoRepository::new();
        repo.expect_create().times(1).returning(|v| {
            assert_eq!(v.duration, 0);
            Ok(())
        });
        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue_video_processing()
            .returning(|_, _| Ok("task".to_string()));
        let mut media = MockMediaProcessor::new();
        media
            .expect_probe()
            .returning(|_, _| Err(ProbeError::Timeout));

        let service = UploadService::new(
            Arc::new(repo),
            Arc::new(queue),
            Arc::new(media),
            storage(dir.path()),
        );
        let video = service.upload(new_upload(spooled, size)).await.unwrap();
        assert_eq!(video.original_resolution, "");
    }
}
