//! Source inspection via ffprobe.

use super::ffmpeg::{ffprobe_path, run_tool, stderr_tail, ToolError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Hard wall-clock deadline for a probe invocation.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

const STDERR_TAIL: usize = 512;

/// Metadata extracted from a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub bitrate_bps: i64,
    pub video_codec: String,
    /// Empty when the file carries no audio stream
    pub audio_codec: String,
    pub container: String,
}

#[derive(Debug)]
pub enum ProbeError {
    /// The 30-second deadline elapsed
    Timeout,
    /// The file has no video stream
    NoVideoStream,
    /// ffprobe output could not be parsed
    Parse(String),
    /// ffprobe exited non-zero
    Tool { stderr_tail: String },
    Io(String),
    Cancelled,
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Timeout => write!(f, "ffprobe timed out after 30 seconds"),
            ProbeError::NoVideoStream => write!(f, "no video stream found in file"),
            ProbeError::Parse(e) => write!(f, "failed to parse ffprobe output: {}", e),
            ProbeError::Tool { stderr_tail } => write!(f, "ffprobe failed: {}", stderr_tail),
            ProbeError::Io(e) => write!(f, "ffprobe execution failed: {}", e),
            ProbeError::Cancelled => write!(f, "probe cancelled"),
        }
    }
}

impl std::error::Error for ProbeError {}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

/// Probe a source file with ffprobe.
pub async fn probe_file(source: &Path, cancel: &CancellationToken) -> Result<MediaInfo, ProbeError> {
    let mut cmd = Command::new(ffprobe_path());
    cmd.arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(source);

    let output = run_tool(cmd, cancel, Some(PROBE_TIMEOUT))
        .await
        .map_err(|e| match e {
            ToolError::Timeout(_) => ProbeError::Timeout,
            ToolError::Cancelled => ProbeError::Cancelled,
            ToolError::Io(e) => ProbeError::Io(e.to_string()),
        })?;

    if !output.status.success() {
        return Err(ProbeError::Tool {
            stderr_tail: stderr_tail(&output, STDERR_TAIL),
        });
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> Result<MediaInfo, ProbeError> {
    let probe: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|e| ProbeError::Parse(e.to_string()))?;

    let mut info = MediaInfo {
        duration_seconds: 0.0,
        width: 0,
        height: 0,
        frame_rate: 0.0,
        bitrate_bps: 0,
        video_codec: String::new(),
        audio_codec: String::new(),
        container: probe.format.format_name.unwrap_or_default(),
    };

    if let Some(duration) = probe.format.duration.as_deref().and_then(|d| d.parse().ok()) {
        info.duration_seconds = duration;
    }
    if let Some(bitrate) = probe.format.bit_rate.as_deref().and_then(|b| b.parse().ok()) {
        info.bitrate_bps = bitrate;
    }

    for stream in &probe.streams {
        match stream.codec_type.as_deref() {
            Some("video") if info.video_codec.is_empty() => {
                info.video_codec = stream.codec_name.clone().unwrap_or_default();
                info.width = stream.width.unwrap_or(0);
                info.height = stream.height.unwrap_or(0);
                if let Some(rate) = stream.r_frame_rate.as_deref() {
                    info.frame_rate = parse_frame_rate(rate);
                }
            }
            Some("audio") if info.audio_codec.is_empty() => {
                info.audio_codec = stream.codec_name.clone().unwrap_or_default();
            }
            _ => {}
        }
    }

    if info.video_codec.is_empty() {
        return Err(ProbeError::NoVideoStream);
    }

    Ok(info)
}

/// ffprobe reports frame rates as fractions like `30000/1001`.
fn parse_frame_rate(raw: &str) -> f64 {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(0.0);
            if den > 0.0 {
                num / den
            } else {
                0.0
            }
        }
        None => raw.parse().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "format": {
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "120.500000",
            "bit_rate": "4800000"
        },
        "streams": [
            {
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1920,
                "height": 1080,
                "r_frame_rate": "30000/1001"
            },
            {
                "codec_type": "audio",
                "codec_name": "aac"
            }
        ]
    }"#;

    #[test]
    fn test_parse_full_output() {
        let info = parse_probe_output(SAMPLE.as_bytes()).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.duration_seconds, 120.5);
        assert_eq!(info.bitrate_bps, 4_800_000);
        assert_eq!(info.video_codec, "h264");
        assert_eq!(info.audio_codec, "aac");
        assert!(info.container.starts_with("mov,mp4"));
        assert!((info.frame_rate - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_rejects_audio_only() {
        let raw = r#"{
            "format": {"format_name": "mp3", "duration": "10.0"},
            "streams": [{"codec_type": "audio", "codec_name": "mp3"}]
        }"#;
        let err = parse_probe_output(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, ProbeError::NoVideoStream));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_probe_output(b"not json").unwrap_err();
        assert!(matches!(err, ProbeError::Parse(_)));
    }

    #[test]
    fn test_no_audio_stream_is_fine() {
        let raw = r#"{
            "format": {"format_name": "mp4"},
            "streams": [{"codec_type": "video", "codec_name": "h264", "width": 640, "height": 360, "r_frame_rate": "30/1"}]
        }"#;
        let info = parse_probe_output(raw.as_bytes()).unwrap();
        assert_eq!(info.audio_codec, "");
        assert_eq!(info.frame_rate, 30.0);
        assert_eq!(info.duration_seconds, 0.0);
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), 30.0);
        assert!((parse_frame_rate("30000/1001") - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("60"), 60.0);
        assert_eq!(parse_frame_rate("30/0"), 0.0);
        assert_eq!(parse_frame_rate("garbage"), 0.0);
    }
}
