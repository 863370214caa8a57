//! Media inspection and re-encoding.
//!
//! The coordinator only needs three things from a media toolkit: the
//! duration of a file, whether it holds a playable video stream, and a
//! re-encode at a target bitrate. [`MediaInspector`] captures exactly that;
//! [`FfmpegInspector`] implements it with ffprobe/ffmpeg.

pub mod ffmpeg;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use ffmpeg::FfmpegInspector;

/// Errors from probing a media file
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("ffprobe failed: {0}")]
    ToolFailed(String),

    #[error("Failed to parse duration: {0:?}")]
    InvalidDuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from re-encoding a media file
#[derive(Error, Debug)]
pub enum CompressError {
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    #[error("Input file not found: {0}")]
    InputNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[async_trait]
pub trait MediaInspector: Send + Sync {
    /// Duration in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError>;

    /// True only if the file has a primary video stream.
    async fn check_integrity(&self, path: &Path) -> Result<bool, ProbeError>;

    /// Re-encodes `path` at `target_kbps` into a new file and returns it.
    /// The input is never modified.
    async fn compress(&self, path: &Path, target_kbps: u64) -> Result<PathBuf, CompressError>;
}

/// Video bitrate (kbit/s) that fits `duration_secs` of video into `max_size_mb`.
///
/// Returns `None` for non-positive or non-finite durations.
pub fn target_bitrate_kbps(max_size_mb: u64, duration_secs: f64) -> Option<u64> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return None;
    }
    let ceiling_kbit = max_size_mb.saturating_mul(8192) as f64;
    Some((ceiling_kbit / duration_secs) as u64)
}

/// `<dir>/<stem>_compressed.mp4`
pub fn compressed_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    input.with_file_name(format!("{}_compressed.mp4", stem))
}
