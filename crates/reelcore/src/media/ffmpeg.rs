//! ffprobe/ffmpeg backed [`MediaInspector`].
//!
//! Every invocation runs under a timeout (ffprobe 30 s, ffmpeg 10 min) and is
//! killed if it overruns.

use super::{compressed_path, CompressError, MediaInspector, ProbeError};
use crate::core::error::AppError;
use crate::core::process::{run_with_timeout, stderr_tail, FFMPEG_TIMEOUT, FFPROBE_TIMEOUT};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Audio bitrate used for every re-encode
const AUDIO_BITRATE: &str = "128k";

/// Media inspector built on the ffmpeg command-line tools.
#[derive(Debug, Clone)]
pub struct FfmpegInspector {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    probe_timeout: Duration,
    encode_timeout: Duration,
}

impl Default for FfmpegInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegInspector {
    pub fn new() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            probe_timeout: FFPROBE_TIMEOUT,
            encode_timeout: FFMPEG_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_binaries(mut self, ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        self.ffmpeg_bin = ffmpeg.into();
        self.ffprobe_bin = ffprobe.into();
        self
    }

    /// Checks that both binaries can be executed.
    pub async fn is_available(&self) -> bool {
        for bin in [&self.ffmpeg_bin, &self.ffprobe_bin] {
            let mut cmd = Command::new(bin);
            cmd.arg("-version");
            match run_with_timeout(&mut cmd, self.probe_timeout).await {
                Ok(output) if output.status.success() => {}
                _ => return false,
            }
        }
        true
    }

    async fn ffprobe(&self, args: &[&str], path: &Path) -> Result<String, ProbeError> {
        let mut cmd = Command::new(&self.ffprobe_bin);
        cmd.args(args).arg(path);

        let output = run_with_timeout(&mut cmd, self.probe_timeout)
            .await
            .map_err(|e| match e {
                AppError::Io(io) => ProbeError::Io(io),
                other => ProbeError::ToolFailed(other.to_string()),
            })?;

        if !output.status.success() {
            return Err(ProbeError::ToolFailed(stderr_tail(&output, 5)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl MediaInspector for FfmpegInspector {
    async fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError> {
        let stdout = self
            .ffprobe(
                &[
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ],
                path,
            )
            .await?;

        stdout
            .parse::<f64>()
            .map_err(|_| ProbeError::InvalidDuration(stdout.clone()))
    }

    async fn check_integrity(&self, path: &Path) -> Result<bool, ProbeError> {
        let result = self
            .ffprobe(
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "stream=codec_type",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ],
                path,
            )
            .await;

        match result {
            Ok(stdout) => Ok(stdout == "video"),
            // ffprobe exits non-zero on files it cannot parse at all
            Err(ProbeError::ToolFailed(reason)) => {
                log::warn!("Integrity check of {} failed: {}", path.display(), reason);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn compress(&self, path: &Path, target_kbps: u64) -> Result<PathBuf, CompressError> {
        if !path.exists() {
            return Err(CompressError::InputNotFound(path.display().to_string()));
        }
        if target_kbps == 0 {
            return Err(CompressError::InvalidInput("target bitrate is zero".to_string()));
        }

        let output_path = compressed_path(path);
        let bitrate = format!("{}k", target_kbps);

        log::info!("Compressing {} at {} kbps", path.display(), target_kbps);

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(path)
            .args([
                "-c:v",
                "libx264",
                "-b:v",
                &bitrate,
                "-preset",
                "medium",
                "-c:a",
                "aac",
                "-b:a",
                AUDIO_BITRATE,
                "-movflags",
                "+faststart",
            ])
            .arg(&output_path);

        let result = run_with_timeout(&mut cmd, self.encode_timeout).await;
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                let _ = tokio::fs::remove_file(&output_path).await;
                return Err(match e {
                    AppError::Io(io) => CompressError::IoError(io),
                    other => CompressError::FfmpegError(other.to_string()),
                });
            }
        };

        if !output.status.success() {
            let stderr = stderr_tail(&output, 5);
            log::error!("FFmpeg compression error: {}", stderr);
            let _ = tokio::fs::remove_file(&output_path).await;
            return Err(CompressError::FfmpegError(stderr));
        }

        Ok(output_path)
    }
}
