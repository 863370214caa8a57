use thiserror::Error;

/// Crate-wide error type for everything outside the download state machine.
///
/// Errors raised while a request is running never escape as `AppError`; the
/// coordinator folds them into a `DownloadOutcome::Failure`. This type covers
/// construction, configuration, filesystem housekeeping and subprocess plumbing.
///
/// # Example
///
/// ```no_run
/// use reelcore::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     log::error!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// External process timed out
    #[error("Process timed out after {0}s")]
    Timeout(u64),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Anyhow errors (for general error handling)
    #[error("Application error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;
