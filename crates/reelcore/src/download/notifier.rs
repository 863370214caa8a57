//! Progress and result reporting towards the end user.
//!
//! The coordinator never depends on a chat platform; it talks to a
//! [`Notifier`] and treats every call as best effort.

use crate::core::error::AppError;
use crate::download::request::DownloadOutcome;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Lifecycle points at which the user hears about a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Admitted,
    Fetching { attempt: u32, max_attempts: u32 },
    Retrying { next_attempt: u32, delay: Duration, reason: String },
    Validating,
    Compressing { size_mb: f64, target_kbps: u64 },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Admitted => write!(f, "Request accepted"),
            Stage::Fetching { attempt, max_attempts } => {
                write!(f, "Downloading (attempt {}/{})", attempt, max_attempts)
            }
            Stage::Retrying {
                next_attempt,
                delay,
                reason,
            } => write!(
                f,
                "Download failed ({}), retrying in {}s (attempt {})",
                reason,
                delay.as_secs(),
                next_attempt
            ),
            Stage::Validating => write!(f, "Checking the downloaded file"),
            Stage::Compressing { size_mb, target_kbps } => write!(
                f,
                "File is {:.1} MB, compressing to about {} kbps",
                size_mb, target_kbps
            ),
        }
    }
}

/// Renders request events for the end user.
///
/// Implementations typically edit a status message in a chat. Errors are
/// logged by the caller and never fail the download.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn on_progress(&self, request_id: &str, text: &str) -> Result<(), AppError>;

    async fn on_result(&self, request_id: &str, outcome: &DownloadOutcome) -> Result<(), AppError>;
}

/// Notifier that only writes to the log. Used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn on_progress(&self, request_id: &str, text: &str) -> Result<(), AppError> {
        log::info!("[{}] {}", request_id, text);
        Ok(())
    }

    async fn on_result(&self, request_id: &str, outcome: &DownloadOutcome) -> Result<(), AppError> {
        if outcome.is_success() {
            log::info!("[{}] {}", request_id, outcome.summary());
        } else {
            log::warn!("[{}] {}", request_id, outcome.summary());
        }
        Ok(())
    }
}

/// Sends a progress update, logging instead of propagating failures.
pub async fn notify_progress(notifier: &dyn Notifier, request_id: &str, stage: &Stage) {
    if let Err(e) = notifier.on_progress(request_id, &stage.to_string()).await {
        log::warn!("Failed to deliver progress for {}: {}", request_id, e);
    }
}

/// Sends the terminal outcome, logging instead of propagating failures.
pub async fn notify_result(notifier: &dyn Notifier, request_id: &str, outcome: &DownloadOutcome) {
    if let Err(e) = notifier.on_result(request_id, outcome).await {
        log::error!("Failed to deliver result for {}: {}", request_id, e);
    }
}
