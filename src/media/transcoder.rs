//! Per-quality progressive transcoding via ffmpeg.

use super::ffmpeg::{ffmpeg_path, run_tool, stderr_tail, ToolError};
use crate::domain::quality::QualitySpec;
use std::path::Path;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const STDERR_TAIL: usize = 1024;

#[derive(Debug)]
pub enum TranscodeError {
    /// ffmpeg exited non-zero for this quality
    Tool {
        quality: &'static str,
        stderr_tail: String,
    },
    Io(String),
    Cancelled,
}

impl std::fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscodeError::Tool {
                quality,
                stderr_tail,
            } => write!(f, "transcode to {} failed: {}", quality, stderr_tail),
            TranscodeError::Io(e) => write!(f, "transcode execution failed: {}", e),
            TranscodeError::Cancelled => write!(f, "transcode cancelled"),
        }
    }
}

impl std::error::Error for TranscodeError {}

fn build_args(source: &Path, dest: &Path, spec: &QualitySpec) -> Vec<String> {
    vec![
        "-i".to_string(),
        source.to_string_lossy().into_owned(),
        "-vf".to_string(),
        format!("scale={}:{}", spec.width, spec.height),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "medium".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-b:v".to_string(),
        spec.bitrate.to_string(),
        "-maxrate".to_string(),
        spec.max_rate.to_string(),
        "-bufsize".to_string(),
        spec.buf_size.to_string(),
        "-r".to_string(),
        spec.fps.to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-y".to_string(),
        dest.to_string_lossy().into_owned(),
    ]
}

/// Transcode `source` into a progressive MP4 at `dest` for one quality.
/// The upscale guard lives with the caller; this function encodes whatever
/// it is asked to. Partial output is removed on any failure.
pub async fn transcode(
    source: &Path,
    dest: &Path,
    spec: &QualitySpec,
    cancel: &CancellationToken,
) -> Result<(), TranscodeError> {
    let mut cmd = Command::new(ffmpeg_path());
    cmd.args(build_args(source, dest, spec));

    let result = run_tool(cmd, cancel, None).await;

    match result {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => {
            remove_partial(dest).await;
            Err(TranscodeError::Tool {
                quality: spec.name,
                stderr_tail: stderr_tail(&output, STDERR_TAIL),
            })
        }
        Err(ToolError::Cancelled) | Err(ToolError::Timeout(_)) => {
            remove_partial(dest).await;
            Err(TranscodeError::Cancelled)
        }
        Err(ToolError::Io(e)) => {
            remove_partial(dest).await;
            Err(TranscodeError::Io(e.to_string()))
        }
    }
}

async fn remove_partial(dest: &Path) {
    let _ = tokio::fs::remove_file(dest).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quality::find_quality;
    use std::path::PathBuf;

    #[test]
    fn test_build_args_encoder_settings() {
        let spec = find_quality("720p").unwrap();
        let args = build_args(
            &PathBuf::from("/in/src.mp4"),
            &PathBuf::from("/out/720p.mp4"),
            spec,
        );

        let joined = args.join(" ");
        assert!(joined.contains("-vf scale=1280:720"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-preset medium"));
        assert!(joined.contains("-crf 23"));
        assert!(joined.contains("-b:v 2800k"));
        assert!(joined.contains("-maxrate 3000k"));
        assert!(joined.contains("-bufsize 6000k"));
        assert!(joined.contains("-r 30"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-b:a 128k"));
        assert!(joined.contains("-movflags +faststart"));
        assert_eq!(args.last().unwrap(), "/out/720p.mp4");
    }

    #[test]
    fn test_build_args_1080p_fps() {
        let spec = find_quality("1080p").unwrap();
        let args = build_args(&PathBuf::from("a"), &PathBuf::from("b"), spec);
        let joined = args.join(" ");
        assert!(joined.contains("scale=1920:1080"));
        assert!(joined.contains("-r 60"));
        assert!(joined.contains("-b:v 5000k"));
    }

    #[tokio::test]
    async fn test_transcode_cancelled_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("360p.mp4");
        tokio::fs::write(&dest, b"partial").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let spec = find_quality("360p").unwrap();
        let err = transcode(&dir.path().join("missing.mp4"), &dest, spec, &cancel)
            .await
            .unwrap_err();
        // Cancelled when ffmpeg spawned, Io when the tool is absent; the
        // partial output must be gone either way.
        assert!(matches!(
            err,
            TranscodeError::Cancelled | TranscodeError::Io(_)
        ));
        assert!(!dest.exists());
    }
}
