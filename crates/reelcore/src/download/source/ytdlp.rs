//! ToolBackend: fetches through an external extractor CLI.
//!
//! yt-dlp covers YouTube, Instagram and most other sites; gallery-dl covers
//! Twitter/X. Each attempt writes into the destination directory under a
//! unique prefix so concurrent downloads for the same user never pick up each
//! other's files, and anything left behind by a failed or cancelled attempt is
//! removed when the attempt ends.

use crate::core::config::ToolConfig;
use crate::core::error::AppError;
use crate::core::process::{run_with_timeout, stderr_tail, FFMPEG_TIMEOUT};
use crate::download::error::{FetchError, FetchErrorKind};
use crate::download::source::{FetchBackend, StagingFiles};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use url::Url;

/// Container extensions accepted as a finished download.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm"];

/// External extractor to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    YtDlp,
    GalleryDl,
}

/// Fetch backend wrapping yt-dlp or gallery-dl.
#[derive(Debug, Clone)]
pub struct ToolBackend {
    tool: Tool,
    config: ToolConfig,
    remux_to_mp4: bool,
}

impl ToolBackend {
    pub fn new(tool: Tool, config: ToolConfig) -> Self {
        Self {
            tool,
            config,
            remux_to_mp4: false,
        }
    }

    /// Remux non-mp4 output (mkv, webm) into mp4 with `ffmpeg -c copy`.
    #[must_use]
    pub fn remux_to_mp4(mut self, enabled: bool) -> Self {
        self.remux_to_mp4 = enabled;
        self
    }

    fn program(&self) -> &str {
        match self.tool {
            Tool::YtDlp => &self.config.ytdlp_bin,
            Tool::GalleryDl => &self.config.gallery_dl_bin,
        }
    }

    /// Command line for one attempt. Every produced file starts with `prefix`.
    ///
    /// Both tools would otherwise copy the server's Last-Modified time onto
    /// the file, which makes fresh downloads look stale to the reaper.
    fn build_args(&self, url: &Url, dest_dir: &Path, prefix: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self.tool {
            Tool::YtDlp => {
                let template = dest_dir.join(format!("{}_%(title).80B.%(ext)s", prefix));
                args.extend([
                    "--no-playlist".to_string(),
                    "--no-progress".to_string(),
                    "--no-mtime".to_string(),
                    "--output".to_string(),
                    template.to_string_lossy().into_owned(),
                ]);
            }
            Tool::GalleryDl => {
                args.extend([
                    "--no-mtime".to_string(),
                    "-D".to_string(),
                    dest_dir.to_string_lossy().into_owned(),
                    "-f".to_string(),
                    format!("{}_{{filename}}.{{extension}}", prefix),
                ]);
            }
        }
        if let Some(proxy) = &self.config.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args.push(url.to_string());
        args
    }

    /// Remuxes `input` into `<stem>_merged.mp4`. On failure the original file
    /// is kept and returned.
    async fn remux(&self, input: PathBuf) -> PathBuf {
        let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let merged = input.with_file_name(format!("{}_merged.mp4", stem));

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y").arg("-i").arg(&input).args(["-c", "copy"]).arg(&merged);

        match run_with_timeout(&mut cmd, FFMPEG_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                if let Err(e) = tokio::fs::remove_file(&input).await {
                    log::warn!("Failed to remove {} after remux: {}", input.display(), e);
                }
                log::info!("Remuxed {} -> {}", input.display(), merged.display());
                merged
            }
            Ok(output) => {
                log::warn!("Remux of {} failed: {}", input.display(), stderr_tail(&output, 5));
                let _ = tokio::fs::remove_file(&merged).await;
                input
            }
            Err(e) => {
                log::warn!("Remux of {} failed: {}", input.display(), e);
                let _ = tokio::fs::remove_file(&merged).await;
                input
            }
        }
    }
}

#[async_trait]
impl FetchBackend for ToolBackend {
    fn name(&self) -> &str {
        match self.tool {
            Tool::YtDlp => "yt-dlp",
            Tool::GalleryDl => "gallery-dl",
        }
    }

    async fn fetch(&self, url: &Url, dest_dir: &Path, timeout: Duration) -> Result<PathBuf, FetchError> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let prefix = uuid::Uuid::new_v4().simple().to_string();
        let mut staging = StagingFiles::new(dest_dir, &prefix);
        let args = self.build_args(url, dest_dir, &prefix);

        log::info!("Running {} for {}", self.program(), url);
        log::debug!("{} args: {:?}", self.program(), args);

        let mut cmd = Command::new(self.program());
        cmd.args(&args);
        let output = run_with_timeout(&mut cmd, timeout).await.map_err(|e| match e {
            AppError::Io(io) => FetchError::unknown(format!("failed to run {}: {}", self.program(), io)),
            other => FetchError::from(other),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let kind = classify_stderr(&stderr);
            let tail = stderr_tail(&output, 5);
            log::error!("{} failed ({}): {}", self.program(), kind, tail);
            return Err(FetchError::new(
                kind,
                format!("{} exited with {}: {}", self.name(), output.status, tail),
            ));
        }

        let produced = find_output(dest_dir, &prefix)?
            .ok_or_else(|| FetchError::unknown("downloaded video file not found"))?;

        let file = if self.remux_to_mp4 && !has_extension(&produced, "mp4") {
            self.remux(produced).await
        } else {
            produced
        };

        staging.keep();
        Ok(file)
    }
}

/// Maps extractor stderr to a fetch error kind.
///
/// Matches the messages yt-dlp and gallery-dl print for the common cases;
/// everything unrecognised is `Unknown` and therefore retried.
pub fn classify_stderr(stderr: &str) -> FetchErrorKind {
    let stderr_lower = stderr.to_lowercase();

    if stderr_lower.contains("http error 429")
        || stderr_lower.contains("too many requests")
        || stderr_lower.contains("rate limit")
        || stderr_lower.contains("rate-limit")
    {
        return FetchErrorKind::RateLimited;
    }

    if stderr_lower.contains("unsupported url")
        || stderr_lower.contains("no suitable extractor")
        || stderr_lower.contains("is not a valid url")
    {
        return FetchErrorKind::Unsupported;
    }

    if stderr_lower.contains("private video")
        || stderr_lower.contains("video unavailable")
        || stderr_lower.contains("this video is not available")
        || stderr_lower.contains("video is private")
        || stderr_lower.contains("has been removed")
        || stderr_lower.contains("does not exist")
        || stderr_lower.contains("http error 404")
        || stderr_lower.contains("notfounderror")
        || stderr_lower.contains("no video could be found")
    {
        return FetchErrorKind::NotFound;
    }

    if stderr_lower.contains("timed out") || stderr_lower.contains("timeout") {
        return FetchErrorKind::Timeout;
    }

    FetchErrorKind::Unknown
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// First finished video file in `dir` whose name starts with `prefix`.
fn find_output(dir: &Path, prefix: &str) -> std::io::Result<Option<PathBuf>> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .filter(|path| VIDEO_EXTENSIONS.iter().any(|ext| has_extension(path, ext)))
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}
