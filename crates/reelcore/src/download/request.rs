use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Chat-platform user identifier.
pub type UserId = i64;

/// One accepted download request.
///
/// Created on submission and dropped once its outcome has been reported.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    /// Unique request identifier (UUID)
    pub request_id: String,
    pub user_id: UserId,
    pub source_url: Url,
    pub submitted_at: DateTime<Utc>,
}

impl DownloadRequest {
    /// Creates a new request with a unique ID and the current timestamp.
    pub fn new(user_id: UserId, source_url: Url) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            source_url,
            submitted_at: Utc::now(),
        }
    }
}

/// Terminal result of a request. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Success {
        file_path: PathBuf,
        size_bytes: u64,
        /// Time spent in the fetch step, retries included
        fetch_duration: Duration,
        /// Time from the start of processing to outcome
        total_duration: Duration,
        /// Whether the delivered file is a re-encode
        compressed: bool,
    },
    Failure {
        reason: String,
        attempts_made: u32,
    },
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Success { .. })
    }

    pub fn file_path(&self) -> Option<&Path> {
        match self {
            DownloadOutcome::Success { file_path, .. } => Some(file_path),
            DownloadOutcome::Failure { .. } => None,
        }
    }

    /// Short human-readable summary, used by the logging notifier and the CLI.
    pub fn summary(&self) -> String {
        match self {
            DownloadOutcome::Success {
                file_path,
                size_bytes,
                total_duration,
                compressed,
                ..
            } => format!(
                "done: {} ({:.2} MB{}) in {:.1}s",
                file_path.display(),
                *size_bytes as f64 / (1024.0 * 1024.0),
                if *compressed { ", compressed" } else { "" },
                total_duration.as_secs_f64()
            ),
            DownloadOutcome::Failure { reason, attempts_made } => {
                format!("failed after {} attempt(s): {}", attempts_made, reason)
            }
        }
    }
}
