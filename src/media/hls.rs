//! HLS packaging: remux progressive outputs into segmented variants and
//! write the master manifest.

use super::ffmpeg::{ffmpeg_path, run_tool, stderr_tail, ToolError};
use crate::domain::quality::QUALITY_CATALOG;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Target segment duration in seconds.
pub const SEGMENT_DURATION: u32 = 6;

const RETRY_PAUSE: Duration = Duration::from_secs(2);
const STDERR_TAIL: usize = 1024;

/// Result of packaging one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantOutput {
    pub playlist_path: PathBuf,
    pub segment_count: usize,
}

#[derive(Debug)]
pub enum PackageError {
    Tool { stderr_tail: String },
    /// Tool reported success but the playlist or segments are missing
    MissingOutput(String),
    Io(String),
    Cancelled,
}

impl std::fmt::Display for PackageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageError::Tool { stderr_tail } => write!(f, "hls packaging failed: {}", stderr_tail),
            PackageError::MissingOutput(e) => write!(f, "hls packaging incomplete: {}", e),
            PackageError::Io(e) => write!(f, "hls packaging io error: {}", e),
            PackageError::Cancelled => write!(f, "hls packaging cancelled"),
        }
    }
}

impl std::error::Error for PackageError {}

fn build_args(mp4: &Path, out_dir: &Path) -> Vec<String> {
    let playlist = out_dir.join("playlist.m3u8");
    let segments = out_dir.join("segment_%03d.ts");
    vec![
        "-i".to_string(),
        mp4.to_string_lossy().into_owned(),
        "-c".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        SEGMENT_DURATION.to_string(),
        "-hls_playlist_type".to_string(),
        "vod".to_string(),
        "-hls_list_size".to_string(),
        "0".to_string(),
        "-hls_segment_filename".to_string(),
        segments.to_string_lossy().into_owned(),
        "-y".to_string(),
        playlist.to_string_lossy().into_owned(),
    ]
}

/// Segment one progressive output into `out_dir`. Remux only, no re-encode.
/// Retries once after a 2-second pause, then verifies the playlist and at
/// least one segment exist.
pub async fn package_variant(
    mp4: &Path,
    out_dir: &Path,
    cancel: &CancellationToken,
) -> Result<VariantOutput, PackageError> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| PackageError::Io(e.to_string()))?;

    if let Err(first) = run_packager(mp4, out_dir, cancel).await {
        match first {
            PackageError::Cancelled => return Err(first),
            _ => {
                tokio::time::sleep(RETRY_PAUSE).await;
                run_packager(mp4, out_dir, cancel).await?;
            }
        }
    }

    let playlist_path = out_dir.join("playlist.m3u8");
    if !playlist_path.is_file() {
        return Err(PackageError::MissingOutput(format!(
            "variant playlist missing at {}",
            playlist_path.display()
        )));
    }

    let segment_count = count_segments(out_dir).await?;
    if segment_count == 0 {
        return Err(PackageError::MissingOutput(format!(
            "no segments produced in {}",
            out_dir.display()
        )));
    }

    Ok(VariantOutput {
        playlist_path,
        segment_count,
    })
}

async fn run_packager(
    mp4: &Path,
    out_dir: &Path,
    cancel: &CancellationToken,
) -> Result<(), PackageError> {
    let mut cmd = Command::new(ffmpeg_path());
    cmd.args(build_args(mp4, out_dir));

    let output = run_tool(cmd, cancel, None).await.map_err(|e| match e {
        ToolError::Cancelled | ToolError::Timeout(_) => PackageError::Cancelled,
        ToolError::Io(e) => PackageError::Io(e.to_string()),
    })?;

    if !output.status.success() {
        return Err(PackageError::Tool {
            stderr_tail: stderr_tail(&output, STDERR_TAIL),
        });
    }
    Ok(())
}

async fn count_segments(dir: &Path) -> Result<usize, PackageError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PackageError::Io(e.to_string()))?;
    let mut count = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PackageError::Io(e.to_string()))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("segment_") && name.ends_with(".ts") {
            count += 1;
        }
    }
    Ok(count)
}

/// Write the master manifest for a video's HLS tree.
///
/// Qualities appear in ascending-bandwidth (catalog) order; a quality is
/// listed only when it is in `qualities` AND its variant playlist exists on
/// disk. Returns the master path and the qualities actually listed.
pub async fn write_master(
    hls_dir: &Path,
    qualities: &[String],
) -> std::io::Result<(PathBuf, Vec<String>)> {
    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    let mut listed = Vec::new();

    for spec in &QUALITY_CATALOG {
        if !qualities.iter().any(|q| q == spec.name) {
            continue;
        }
        if !hls_dir.join(spec.name).join("playlist.m3u8").is_file() {
            continue;
        }
        body.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n{}/playlist.m3u8\n",
            spec.bandwidth_bps,
            spec.resolution(),
            spec.name
        ));
        listed.push(spec.name.to_string());
    }

    let master_path = hls_dir.join("master.m3u8");
    let mut file = tokio::fs::File::create(&master_path).await?;
    file.write_all(body.as_bytes()).await?;
    file.flush().await?;

    Ok((master_path, listed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn make_variant(hls_dir: &Path, quality: &str) {
        let dir = hls_dir.join(quality);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("playlist.m3u8"), "#EXTM3U\n")
            .await
            .unwrap();
    }

    #[test]
    fn test_build_args_remux_only() {
        let args = build_args(&PathBuf::from("/p/720p.mp4"), &PathBuf::from("/p/hls/720p"));
        let joined = args.join(" ");
        assert!(joined.contains("-c copy"));
        assert!(joined.contains("-f hls"));
        assert!(joined.contains("-hls_time 6"));
        assert!(joined.contains("-hls_playlist_type vod"));
        assert!(joined.contains("-hls_list_size 0"));
        assert!(joined.contains("segment_%03d.ts"));
        assert!(joined.ends_with("/p/hls/720p/playlist.m3u8"));
    }

    #[tokio::test]
    async fn test_write_master_all_qualities() {
        let dir = tempdir().unwrap();
        for q in ["360p", "480p", "720p", "1080p"] {
            make_variant(dir.path(), q).await;
        }

        let qualities: Vec<String> = ["360p", "480p", "720p", "1080p"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (path, listed) = write_master(dir.path(), &qualities).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            content,
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
             360p/playlist.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=1400000,RESOLUTION=854x480\n\
             480p/playlist.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720\n\
             720p/playlist.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080\n\
             1080p/playlist.m3u8\n"
        );
        assert_eq!(listed, vec!["360p", "480p", "720p", "1080p"]);
    }

    #[tokio::test]
    async fn test_write_master_single_low_res() {
        let dir = tempdir().unwrap();
        make_variant(dir.path(), "360p").await;

        let (path, listed) = write_master(dir.path(), &["360p".to_string()]).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();

        assert_eq!(
            content,
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n360p/playlist.m3u8\n"
        );
        assert_eq!(listed, vec!["360p"]);
        assert_eq!(content.matches("EXT-X-STREAM-INF").count(), 1);
    }

    #[tokio::test]
    async fn test_write_master_skips_missing_variant() {
        let dir = tempdir().unwrap();
        make_variant(dir.path(), "360p").await;
        // 720p requested but its variant playlist never landed on disk

        let qualities = vec!["360p".to_string(), "720p".to_string()];
        let (_, listed) = write_master(dir.path(), &qualities).await.unwrap();
        assert_eq!(listed, vec!["360p"]);
    }

    #[tokio::test]
    async fn test_count_segments() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("segment_000.ts"), b"a")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("segment_001.ts"), b"b")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("playlist.m3u8"), b"#EXTM3U")
            .await
            .unwrap();
        assert_eq!(count_segments(dir.path()).await.unwrap(), 2);
    }
}
