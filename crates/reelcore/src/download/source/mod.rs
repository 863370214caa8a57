//! Pluggable fetch backends and URL routing.
//!
//! A URL is classified into a [`SourceKind`]; the [`SourceRegistry`] maps each
//! kind to exactly one [`FetchBackend`].
//!
//! Built-in backends:
//! - `ToolBackend`: yt-dlp or gallery-dl as an external process
//! - `HttpBackend`: direct file URLs streamed with reqwest

pub mod http;
pub mod ytdlp;

use crate::core::config::CoordinatorConfig;
use crate::core::error::AppResult;
use crate::download::error::FetchError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use http::HttpBackend;
pub use ytdlp::{Tool, ToolBackend};

/// Extensions treated as a direct media file link.
const DIRECT_FILE_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "avi", "m4v"];

/// Turns a source URL into a local file.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    /// Human-readable name of this backend (e.g., "yt-dlp", "http")
    fn name(&self) -> &str;

    /// Downloads `url` into `dest_dir` and returns the produced file.
    ///
    /// `timeout` is the per-attempt budget. The coordinator enforces it with a
    /// hard deadline as well, so backends only need it for their own
    /// subprocess or client limits.
    async fn fetch(&self, url: &Url, dest_dir: &Path, timeout: Duration) -> Result<PathBuf, FetchError>;
}

/// Coarse origin of a URL, used to pick a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    YouTube,
    Twitter,
    Instagram,
    DirectFile,
    Other,
}

impl SourceKind {
    pub fn classify(url: &Url) -> Self {
        let host = match url.host_str() {
            Some(host) => host.to_lowercase(),
            None => return SourceKind::Other,
        };
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let on = |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));

        if on("youtube.com") || on("youtu.be") {
            SourceKind::YouTube
        } else if on("twitter.com") || on("x.com") {
            SourceKind::Twitter
        } else if on("instagram.com") {
            SourceKind::Instagram
        } else if Self::is_direct_file(url) {
            SourceKind::DirectFile
        } else {
            SourceKind::Other
        }
    }

    fn is_direct_file(url: &Url) -> bool {
        let path = url.path().to_lowercase();
        DIRECT_FILE_EXTENSIONS
            .iter()
            .any(|ext| path.ends_with(&format!(".{}", ext)))
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::YouTube => "youtube",
            SourceKind::Twitter => "twitter",
            SourceKind::Instagram => "instagram",
            SourceKind::DirectFile => "direct file",
            SourceKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Maps each [`SourceKind`] to the backend that handles it.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    backends: HashMap<SourceKind, Arc<dyn FetchBackend>>,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: SourceKind, backend: Arc<dyn FetchBackend>) {
        self.backends.insert(kind, backend);
    }

    #[must_use]
    pub fn with(mut self, kind: SourceKind, backend: Arc<dyn FetchBackend>) -> Self {
        self.register(kind, backend);
        self
    }

    /// Finds the backend for `url`.
    ///
    /// Non-http(s) URLs and kinds with nothing registered are `Unsupported`.
    pub fn resolve(&self, url: &Url) -> Result<Arc<dyn FetchBackend>, FetchError> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(FetchError::unsupported(format!("unsupported scheme: {}", url.scheme())));
        }
        let kind = SourceKind::classify(url);
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| FetchError::unsupported(format!("no backend for {} links", kind)))
    }

    /// Built-in routing: gallery-dl for Twitter, yt-dlp for YouTube,
    /// Instagram and anything else, plain HTTP for direct file links.
    pub fn default_registry(config: &CoordinatorConfig) -> AppResult<Self> {
        let tools = &config.tools;
        let ytdlp: Arc<dyn FetchBackend> = Arc::new(ToolBackend::new(Tool::YtDlp, tools.clone()));
        let youtube: Arc<dyn FetchBackend> =
            Arc::new(ToolBackend::new(Tool::YtDlp, tools.clone()).remux_to_mp4(true));
        let gallery: Arc<dyn FetchBackend> = Arc::new(ToolBackend::new(Tool::GalleryDl, tools.clone()));
        let http: Arc<dyn FetchBackend> = Arc::new(HttpBackend::new(
            config.max_download_size_bytes(),
            tools.proxy.as_deref(),
        )?);

        Ok(Self::new()
            .with(SourceKind::YouTube, youtube)
            .with(SourceKind::Twitter, gallery)
            .with(SourceKind::Instagram, Arc::clone(&ytdlp))
            .with(SourceKind::Other, ytdlp)
            .with(SourceKind::DirectFile, http))
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .backends
            .iter()
            .map(|(kind, backend)| format!("{}={}", kind, backend.name()))
            .collect();
        names.sort();
        f.debug_struct("SourceRegistry").field("backends", &names).finish()
    }
}

/// Removes every file of one fetch attempt when dropped, unless `keep` was
/// called. Files are matched by name prefix.
///
/// Runs on error returns and when the attempt future is dropped by the
/// coordinator's timeout.
pub(crate) struct StagingFiles {
    dir: PathBuf,
    prefix: String,
    armed: bool,
}

impl StagingFiles {
    pub(crate) fn new(dir: &Path, prefix: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            armed: true,
        }
    }

    pub(crate) fn keep(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingFiles {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&self.prefix) {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => log::debug!("Removed partial file {}", entry.path().display()),
                    Err(e) => log::warn!("Failed to remove partial file {}: {}", entry.path().display(), e),
                }
            }
        }
    }
}
