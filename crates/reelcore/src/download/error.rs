use crate::core::error::AppError;
use crate::core::retry::Retryable;
use std::fmt;
use thiserror::Error;

/// Coarse classification of a failed fetch.
///
/// This is all the coordinator needs to decide whether another attempt is
/// worth it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// The source says the media does not exist (404, removed, private)
    NotFound,
    /// The attempt ran past the fetch timeout
    Timeout,
    /// The source throttled us (429, "too many requests")
    RateLimited,
    /// No backend handles this URL
    Unsupported,
    /// The announced size exceeds the download ceiling
    TooLarge,
    /// Anything else: tool crashed, network hiccup, file missing afterwards
    Unknown,
}

impl FetchErrorKind {
    /// Whether another attempt may succeed
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FetchErrorKind::Timeout | FetchErrorKind::RateLimited | FetchErrorKind::Unknown
        )
    }

    /// Returns label for metrics
    pub fn label(self) -> &'static str {
        match self {
            FetchErrorKind::NotFound => "not_found",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::Unsupported => "unsupported",
            FetchErrorKind::TooLarge => "too_large",
            FetchErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned by a fetch backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::RateLimited, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unsupported, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unknown, message)
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<AppError> for FetchError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Timeout(secs) => FetchError::timeout(format!("timed out after {}s", secs)),
            other => FetchError::unknown(other.to_string()),
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::unknown(format!("IO error: {}", err))
    }
}

/// Why a request was refused before any work started.
///
/// Not a download attempt: nothing is retried and no download metric moves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionDenied {
    /// The resource gate vetoed; carries its reason
    #[error("{0}")]
    ResourceConstrained(String),
    /// The user already has `limit` downloads in flight
    #[error("too many concurrent downloads")]
    QuotaExceeded { active: usize, limit: usize },
}

impl AdmissionDenied {
    /// Returns label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            AdmissionDenied::ResourceConstrained(_) => "resources",
            AdmissionDenied::QuotaExceeded { .. } => "quota",
        }
    }
}

/// Internal failure of one request; folded into `DownloadOutcome::Failure`
/// at the coordinator boundary.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The fetched file does not decode as a video
    #[error("corrupt download: {0}")]
    CorruptDownload(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Returns label for logs and metrics
    pub fn subcategory(&self) -> &'static str {
        match self {
            RunError::Fetch(e) => e.kind.label(),
            RunError::CorruptDownload(_) => "corrupt_download",
            RunError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(FetchErrorKind::Timeout.is_retryable());
        assert!(FetchErrorKind::RateLimited.is_retryable());
        assert!(FetchErrorKind::Unknown.is_retryable());
        assert!(!FetchErrorKind::NotFound.is_retryable());
        assert!(!FetchErrorKind::Unsupported.is_retryable());
        assert!(!FetchErrorKind::TooLarge.is_retryable());
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::rate_limited("HTTP 429");
        assert_eq!(err.to_string(), "rate_limited: HTTP 429");
    }

    #[test]
    fn test_app_timeout_maps_to_timeout_kind() {
        let err: FetchError = AppError::Timeout(180).into();
        assert_eq!(err.kind, FetchErrorKind::Timeout);
        let err: FetchError = AppError::Config("x".into()).into();
        assert_eq!(err.kind, FetchErrorKind::Unknown);
    }

    #[test]
    fn test_quota_denial_reason() {
        let denied = AdmissionDenied::QuotaExceeded { active: 2, limit: 2 };
        assert_eq!(denied.to_string(), "too many concurrent downloads");
        assert_eq!(denied.label(), "quota");
    }

    #[test]
    fn test_run_error_subcategory() {
        assert_eq!(RunError::from(FetchError::timeout("t")).subcategory(), "timeout");
        assert_eq!(RunError::CorruptDownload("x".into()).subcategory(), "corrupt_download");
    }
}
