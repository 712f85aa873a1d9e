//! Thumbnail frame extraction.

use super::ffmpeg::{ffmpeg_path, run_tool, stderr_tail, ToolError};
use std::path::Path;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const STDERR_TAIL: usize = 512;

#[derive(Debug)]
pub enum ThumbnailError {
    Tool { stderr_tail: String },
    Io(String),
    Cancelled,
}

impl std::fmt::Display for ThumbnailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThumbnailError::Tool { stderr_tail } => {
                write!(f, "thumbnail generation failed: {}", stderr_tail)
            }
            ThumbnailError::Io(e) => write!(f, "thumbnail execution failed: {}", e),
            ThumbnailError::Cancelled => write!(f, "thumbnail cancelled"),
        }
    }
}

impl std::error::Error for ThumbnailError {}

/// Seek point for the thumbnail frame: 10% into the video, capped at 10 s.
pub fn thumbnail_seek(duration_seconds: f64) -> f64 {
    (duration_seconds * 0.1).min(10.0)
}

/// Extract a single frame at `seek_secs`, scaled to 320x180.
pub async fn generate(
    source: &Path,
    dest: &Path,
    seek_secs: f64,
    cancel: &CancellationToken,
) -> Result<(), ThumbnailError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ThumbnailError::Io(e.to_string()))?;
    }

    let mut cmd = Command::new(ffmpeg_path());
    cmd.arg("-i")
        .arg(source)
        .arg("-ss")
        .arg(format!("{:.2}", seek_secs))
        .arg("-vframes")
        .arg("1")
        .arg("-vf")
        .arg("scale=320:180")
        .arg("-y")
        .arg(dest);

    let output = run_tool(cmd, cancel, None).await.map_err(|e| match e {
        ToolError::Cancelled | ToolError::Timeout(_) => ThumbnailError::Cancelled,
        ToolError::Io(e) => ThumbnailError::Io(e.to_string()),
    })?;

    if !output.status.success() {
        return Err(ThumbnailError::Tool {
            stderr_tail: stderr_tail(&output, STDERR_TAIL),
        });
    }
    Ok(())
}
