//! Reelgrab - download orchestration core for "send a link, get a video" bots
//!
//! This library accepts social-media links on behalf of users, caps their
//! concurrent downloads, vetoes work while the host is under pressure,
//! retries failed fetches, validates and (when needed) compresses the
//! result, and cleans up afterwards. Chat platforms plug in through
//! [`download::Notifier`]; content sources through [`download::FetchBackend`].
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics, retry and host resources
//! - `download`: the coordinator, quota, fetch backends and cleanup
//! - `media`: ffprobe/ffmpeg inspection and compression

pub mod core;
pub mod download;
pub mod media;

// Re-export commonly used types for convenience
pub use core::{init_logger, AppError, AppResult, CoordinatorConfig, Metrics, RetryPolicy};
pub use download::{
    spawn_reaper, AdmissionDenied, DownloadCoordinator, DownloadHandle, DownloadOutcome, FetchBackend, FetchError,
    FetchErrorKind, Notifier, ReapReport, ShutdownMode, SourceKind, SourceRegistry,
};
pub use media::{FfmpegInspector, MediaInspector};
