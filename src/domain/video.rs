//! The video record and its processing state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 5000;

/// Lifecycle of a video record.
///
/// `uploading -> processing -> ready | failed`; a failed video returns to
/// `uploading` only through the admin retry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Uploading,
    Processing,
    Ready,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploading => "uploading",
            VideoStatus::Processing => "processing",
            VideoStatus::Ready => "ready",
            VideoStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(VideoStatus::Uploading),
            "processing" => Some(VideoStatus::Processing),
            "ready" => Some(VideoStatus::Ready),
            "failed" => Some(VideoStatus::Failed),
            _ => None,
        }
    }

    /// Terminal until an external transition (admin retry) intervenes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Ready | VideoStatus::Failed)
    }

    /// May a processing attempt start from this status?
    pub fn can_start_processing(&self) -> bool {
        matches!(self, VideoStatus::Uploading | VideoStatus::Failed)
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery protocol advertised for a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingProtocol {
    Progressive,
    Hls,
}

impl StreamingProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamingProtocol::Progressive => "progressive",
            StreamingProtocol::Hls => "hls",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Video {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    /// Whole seconds; 0 until probed
    pub duration: i32,
    /// "WxH"; empty until probed
    pub original_resolution: String,
    pub thumbnail_path: Option<String>,
    pub status: VideoStatus,
    pub transcoding_progress: i32,
    pub available_qualities: Vec<String>,
    pub hls_master_path: Option<String>,
    pub hls_ready: bool,
    pub streaming_protocol: StreamingProtocol,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum VideoError {
    InvalidTitle,
    TitleTooLong,
    DescriptionTooLong,
    InvalidFileSize,
    InvalidFilename,
    InvalidMimeType,
}

impl fmt::Display for VideoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoError::InvalidTitle => write!(f, "invalid video title"),
            VideoError::TitleTooLong => write!(f, "video title is too long"),
            VideoError::DescriptionTooLong => write!(f, "video description is too long"),
            VideoError::InvalidFileSize => write!(f, "invalid file size"),
            VideoError::InvalidFilename => write!(f, "invalid filename"),
            VideoError::InvalidMimeType => write!(f, "invalid mime type"),
        }
    }
}

impl std::error::Error for VideoError {}

impl Video {
    /// Create a new record in `uploading` status. Validates the invariants
    /// that hold for every persisted video.
    pub fn new(
        title: String,
        description: String,
        filename: String,
        file_path: String,
        file_size: i64,
        mime_type: String,
    ) -> Result<Self, VideoError> {
        let now = Utc::now();
        let video = Self {
            id: Uuid::new_v4(),
            title,
            description,
            filename,
            file_path,
            file_size,
            mime_type,
            duration: 0,
            original_resolution: String::new(),
            thumbnail_path: None,
            status: VideoStatus::Uploading,
            transcoding_progress: 0,
            available_qualities: Vec::new(),
            hls_master_path: None,
            hls_ready: false,
            streaming_protocol: StreamingProtocol::Progressive,
            created_at: now,
            updated_at: now,
            processed_at: None,
        };
        video.validate()?;
        Ok(video)
    }

    pub fn validate(&self) -> Result<(), VideoError> {
        if self.title.trim().is_empty() {
            return Err(VideoError::InvalidTitle);
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(VideoError::TitleTooLong);
        }
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(VideoError::DescriptionTooLong);
        }
        if self.file_size <= 0 {
            return Err(VideoError::InvalidFileSize);
        }
        if self.filename.is_empty() {
            return Err(VideoError::InvalidFilename);
        }
        if self.mime_type.is_empty() {
            return Err(VideoError::InvalidMimeType);
        }
        Ok(())
    }

    pub fn can_be_streamed(&self) -> bool {
        self.status == VideoStatus::Ready && !self.available_qualities.is_empty()
    }

    /// Human-readable status line for the status endpoint.
    pub fn status_message(&self) -> &'static str {
        match self.status {
            VideoStatus::Uploading => "Video is queued for processing",
            VideoStatus::Processing => "Video is being processed...",
            VideoStatus::Ready => "Video is ready to stream",
            VideoStatus::Failed => "Video processing failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_video() -> Video {
        Video::new(
            "Intro".to_string(),
            "A test clip".to_string(),
            "intro.mp4".to_string(),
            "/uploads/raw/intro.mp4".to_string(),
            1024,
            "video/mp4".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_video_defaults() {
        let v = valid_video();
        assert_eq!(v.status, VideoStatus::Uploading);
        assert_eq!(v.transcoding_progress, 0);
        assert_eq!(v.duration, 0);
        assert!(v.available_qualities.is_empty());
        assert!(!v.hls_ready);
        assert_eq!(v.streaming_protocol, StreamingProtocol::Progressive);
        assert!(v.processed_at.is_none());
    }

    #[test]
    fn test_validation_rejects_empty_title() {
        let err = Video::new(
            "   ".to_string(),
            String::new(),
            "a.mp4".to_string(),
            "/a.mp4".to_string(),
            1,
            "video/mp4".to_string(),
        )
        .unwrap_err();
        assert_eq!(err, VideoError::InvalidTitle);
    }

    #[test]
    fn test_validation_rejects_long_title() {
        let err = Video::new(
            "x".repeat(256),
            String::new(),
            "a.mp4".to_string(),
            "/a.mp4".to_string(),
            1,
            "video/mp4".to_string(),
        )
        .unwrap_err();
        assert_eq!(err, VideoError::TitleTooLong);
    }

    #[test]
    fn test_validation_rejects_zero_size() {
        let err = Video::new(
            "ok".to_string(),
            String::new(),
            "a.mp4".to_string(),
            "/a.mp4".to_string(),
            0,
            "video/mp4".to_string(),
        )
        .unwrap_err();
        assert_eq!(err, VideoError::InvalidFileSize);
    }

    #[test]
    fn test_status_transitions() {
        assert!(VideoStatus::Uploading.can_start_processing());
        assert!(VideoStatus::Failed.can_start_processing());
        assert!(!VideoStatus::Processing.can_start_processing());
        assert!(!VideoStatus::Ready.can_start_processing());

        assert!(VideoStatus::Ready.is_terminal());
        assert!(VideoStatus::Failed.is_terminal());
        assert!(!VideoStatus::Uploading.is_terminal());
    }

    #[test]
    fn test_status_serde_roundtrip() {
        for s in [
            VideoStatus::Uploading,
            VideoStatus::Processing,
            VideoStatus::Ready,
            VideoStatus::Failed,
        ] {
            let json = serde_json::to_string(&s).unwrap();
            assert_eq!(json, format!("\"{}\"", s.as_str()));
            assert_eq!(VideoStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(VideoStatus::parse("bogus"), None);
    }

    #[test]
    fn test_can_be_streamed() {
        let mut v = valid_video();
        assert!(!v.can_be_streamed());
        v.status = VideoStatus::Ready;
        assert!(!v.can_be_streamed());
        v.available_qualities.push("360p".to_string());
        assert!(v.can_be_streamed());
    }
}
