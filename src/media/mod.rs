//! Media tooling: everything that shells out to ffprobe/ffmpeg.
//!
//! The [`MediaProcessor`] trait is the seam the pipeline depends on; the
//! [`FfmpegProcessor`] implementation drives the external tools as
//! subprocesses with cancellation support.

pub mod ffmpeg;
pub mod hls;
pub mod probe;
pub mod thumbnail;
pub mod transcoder;

use crate::domain::quality::QualitySpec;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub use hls::{write_master, PackageError, VariantOutput};
pub use probe::{MediaInfo, ProbeError};
pub use thumbnail::ThumbnailError;
pub use transcoder::TranscodeError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Inspect a source file. Hard 30-second deadline.
    async fn probe(
        &self,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<MediaInfo, ProbeError>;

    /// Produce one progressive output at `dest` for the given quality.
    /// Partial output is removed on failure or cancellation.
    async fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        quality: &QualitySpec,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError>;

    /// Remux one progressive output into HLS segments plus a variant
    /// playlist under `out_dir`. Retries once after a 2-second pause.
    async fn package_variant(
        &self,
        mp4: &Path,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<VariantOutput, PackageError>;

    /// Extract a single 320x180 frame at `seek_secs` into `dest`.
    async fn thumbnail(
        &self,
        source: &Path,
        dest: &Path,
        seek_secs: f64,
        cancel: &CancellationToken,
    ) -> Result<(), ThumbnailError>;
}

/// Subprocess-backed implementation of [`MediaProcessor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegProcessor;

impl FfmpegProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaProcessor for FfmpegProcessor {
    async fn probe(
        &self,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<MediaInfo, ProbeError> {
        probe::probe_file(source, cancel).await
    }

    async fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        quality: &QualitySpec,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        transcoder::transcode(source, dest, quality, cancel).await
    }

    async fn package_variant(
        &self,
        mp4: &Path,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<VariantOutput, PackageError> {
        hls::package_variant(mp4, out_dir, cancel).await
    }

    async fn thumbnail(
        &self,
        source: &Path,
        dest: &Path,
        seek_secs: f64,
        cancel: &CancellationToken,
    ) -> Result<(), ThumbnailError> {
        thumbnail::generate(source, dest, seek_secs, cancel).await
    }
}

