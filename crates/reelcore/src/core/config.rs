//! Coordinator configuration.
//!
//! Every knob has a compiled-in default (see [`defaults`]) and can be
//! overridden from the environment with [`CoordinatorConfig::from_env`].
//! The binary loads `.env` before calling it; the library never reads the
//! environment on its own, so a config is built once at startup and passed
//! down explicitly.

use crate::core::error::{AppError, AppResult};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Compiled-in defaults
pub mod defaults {
    /// Number of requests that may execute at the same time
    pub const WORKER_POOL_SIZE: usize = 8;

    /// Maximum in-flight downloads per user
    pub const MAX_CONCURRENT_PER_USER: usize = 3;

    /// Hard timeout for one fetch attempt (in seconds)
    pub const FETCH_TIMEOUT_SECS: u64 = 180;

    /// Total fetch attempts per request
    pub const MAX_RETRIES: u32 = 3;

    /// Fixed delay between fetch attempts (in seconds)
    pub const RETRY_DELAY_SECS: u64 = 5;

    /// Delivered files above this size get re-encoded (Telegram Bot API upload limit)
    pub const MAX_FILE_SIZE_MB: u64 = 50;

    /// Direct downloads announcing more than this are refused before fetching
    pub const MAX_DOWNLOAD_SIZE_MB: u64 = 2000;

    pub const DOWNLOAD_FOLDER: &str = "downloads";

    pub const MEMORY_THRESHOLD_PERCENT: f64 = 75.0;

    pub const MIN_AVAILABLE_MEMORY_MB: f64 = 500.0;

    pub const CPU_THRESHOLD_PERCENT: f64 = 90.0;

    /// CPU sampling window (in milliseconds)
    pub const CPU_SAMPLE_WINDOW_MS: u64 = 1000;

    /// Files under the download root older than this are reaped (in hours)
    pub const STALE_FILE_MAX_AGE_HOURS: u64 = 24;

    /// Delay before a delivered file is deleted (in seconds)
    pub const FILE_CLEANUP_DELAY_SECS: u64 = 600; // 10 minutes

    pub const YTDL_BIN: &str = "yt-dlp";

    pub const GALLERY_DL_BIN: &str = "gallery-dl";

    pub const LOG_FILE_PATH: &str = "reelgrab.log";
}

/// Host resource thresholds used by the resource gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    /// Deny when memory used percent is above this
    pub memory_threshold_percent: f64,
    /// Deny when available memory (MB) is below this
    pub min_available_memory_mb: f64,
    /// Deny when CPU percent is above this
    pub cpu_threshold_percent: f64,
    /// How long the CPU sample is taken over
    pub cpu_sample_window: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_threshold_percent: defaults::MEMORY_THRESHOLD_PERCENT,
            min_available_memory_mb: defaults::MIN_AVAILABLE_MEMORY_MB,
            cpu_threshold_percent: defaults::CPU_THRESHOLD_PERCENT,
            cpu_sample_window: Duration::from_millis(defaults::CPU_SAMPLE_WINDOW_MS),
        }
    }
}

/// External tool settings for the CLI fetch backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    pub ytdlp_bin: String,
    pub gallery_dl_bin: String,
    /// Optional proxy, e.g. `socks5://127.0.0.1:18888`
    pub proxy: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ytdlp_bin: defaults::YTDL_BIN.to_string(),
            gallery_dl_bin: defaults::GALLERY_DL_BIN.to_string(),
            proxy: None,
        }
    }
}

/// Everything the download coordinator needs at construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub worker_pool_size: usize,
    pub max_concurrent_per_user: usize,
    pub fetch_timeout: Duration,
    /// Total fetch attempts, including the first one
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_file_size_mb: u64,
    pub max_download_size_mb: u64,
    pub download_dir: PathBuf,
    pub resources: ResourceLimits,
    pub stale_file_max_age: Duration,
    pub cleanup_delay: Duration,
    pub tools: ToolConfig,
    pub log_file_path: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: defaults::WORKER_POOL_SIZE,
            max_concurrent_per_user: defaults::MAX_CONCURRENT_PER_USER,
            fetch_timeout: Duration::from_secs(defaults::FETCH_TIMEOUT_SECS),
            max_retries: defaults::MAX_RETRIES,
            retry_delay: Duration::from_secs(defaults::RETRY_DELAY_SECS),
            max_file_size_mb: defaults::MAX_FILE_SIZE_MB,
            max_download_size_mb: defaults::MAX_DOWNLOAD_SIZE_MB,
            download_dir: PathBuf::from(defaults::DOWNLOAD_FOLDER),
            resources: ResourceLimits::default(),
            stale_file_max_age: duration_from_hours(defaults::STALE_FILE_MAX_AGE_HOURS),
            cleanup_delay: Duration::from_secs(defaults::FILE_CLEANUP_DELAY_SECS),
            tools: ToolConfig::default(),
            log_file_path: defaults::LOG_FILE_PATH.to_string(),
        }
    }
}

/// Reads `key` and parses it, falling back to `default` when the variable is
/// unset, empty or malformed.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Ignoring invalid {}={:?}, using default {:?}", key, raw, default);
                default
            }
        },
        _ => default,
    }
}

/// Whole hours as a duration, saturating instead of overflowing.
pub fn duration_from_hours(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

/// Largest size setting (in MB) whose byte count still fits in a `u64`
const MAX_SIZE_MB: u64 = u64::MAX / (1024 * 1024);

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .and_then(|s| if s.trim().is_empty() { None } else { Some(s.trim().to_string()) })
}

impl CoordinatorConfig {
    /// Creates a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a config from environment variables, using defaults for
    /// anything unset.
    ///
    /// `DOWNLOAD_FOLDER` supports tilde (~) expansion.
    pub fn from_env() -> Self {
        let download_dir = env_string("DOWNLOAD_FOLDER").unwrap_or_else(|| defaults::DOWNLOAD_FOLDER.to_string());
        let download_dir = PathBuf::from(shellexpand::tilde(&download_dir).into_owned());

        Self {
            worker_pool_size: env_or("WORKER_POOL_SIZE", defaults::WORKER_POOL_SIZE),
            max_concurrent_per_user: env_or("MAX_CONCURRENT_PER_USER", defaults::MAX_CONCURRENT_PER_USER),
            fetch_timeout: Duration::from_secs(env_or("FETCH_TIMEOUT_SECS", defaults::FETCH_TIMEOUT_SECS)),
            max_retries: env_or("MAX_RETRIES", defaults::MAX_RETRIES),
            retry_delay: Duration::from_secs(env_or("RETRY_DELAY_SECS", defaults::RETRY_DELAY_SECS)),
            max_file_size_mb: env_or("MAX_FILE_SIZE_MB", defaults::MAX_FILE_SIZE_MB),
            max_download_size_mb: env_or("MAX_DOWNLOAD_SIZE_MB", defaults::MAX_DOWNLOAD_SIZE_MB),
            download_dir,
            resources: ResourceLimits {
                memory_threshold_percent: env_or("MEMORY_THRESHOLD_PERCENT", defaults::MEMORY_THRESHOLD_PERCENT),
                min_available_memory_mb: env_or("MIN_AVAILABLE_MEMORY_MB", defaults::MIN_AVAILABLE_MEMORY_MB),
                cpu_threshold_percent: env_or("CPU_THRESHOLD_PERCENT", defaults::CPU_THRESHOLD_PERCENT),
                cpu_sample_window: Duration::from_millis(defaults::CPU_SAMPLE_WINDOW_MS),
            },
            stale_file_max_age: duration_from_hours(env_or(
                "STALE_FILE_MAX_AGE_HOURS",
                defaults::STALE_FILE_MAX_AGE_HOURS,
            )),
            cleanup_delay: Duration::from_secs(env_or("FILE_CLEANUP_DELAY_SECS", defaults::FILE_CLEANUP_DELAY_SECS)),
            tools: ToolConfig {
                ytdlp_bin: env_string("YTDL_BIN").unwrap_or_else(|| defaults::YTDL_BIN.to_string()),
                gallery_dl_bin: env_string("GALLERY_DL_BIN").unwrap_or_else(|| defaults::GALLERY_DL_BIN.to_string()),
                proxy: env_string("DOWNLOAD_PROXY"),
            },
            log_file_path: env_string("LOG_FILE_PATH").unwrap_or_else(|| defaults::LOG_FILE_PATH.to_string()),
        }
    }

    /// Rejects values the coordinator cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.worker_pool_size == 0 {
            return Err(AppError::Config("worker_pool_size must be at least 1".to_string()));
        }
        if self.worker_pool_size > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(AppError::Config(format!(
                "worker_pool_size must be at most {}",
                tokio::sync::Semaphore::MAX_PERMITS
            )));
        }
        if self.max_concurrent_per_user == 0 {
            return Err(AppError::Config("max_concurrent_per_user must be at least 1".to_string()));
        }
        if self.max_retries == 0 {
            return Err(AppError::Config("max_retries must be at least 1".to_string()));
        }
        if self.max_file_size_mb == 0 {
            return Err(AppError::Config("max_file_size_mb must be at least 1".to_string()));
        }
        if self.max_file_size_mb > MAX_SIZE_MB || self.max_download_size_mb > MAX_SIZE_MB {
            return Err(AppError::Config(format!("size limits must be at most {} MB", MAX_SIZE_MB)));
        }
        Ok(())
    }

    /// Compression ceiling in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    /// Pre-fetch size ceiling in bytes.
    pub fn max_download_size_bytes(&self) -> u64 {
        self.max_download_size_mb.saturating_mul(1024 * 1024)
    }

    #[must_use]
    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    #[must_use]
    pub fn max_concurrent_per_user(mut self, max: usize) -> Self {
        self.max_concurrent_per_user = max;
        self
    }

    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn max_file_size_mb(mut self, mb: u64) -> Self {
        self.max_file_size_mb = mb;
        self
    }

    #[must_use]
    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    #[must_use]
    pub fn resources(mut self, limits: ResourceLimits) -> Self {
        self.resources = limits;
        self
    }

    #[must_use]
    pub fn cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "WORKER_POOL_SIZE",
        "MAX_CONCURRENT_PER_USER",
        "FETCH_TIMEOUT_SECS",
        "MAX_RETRIES",
        "MAX_FILE_SIZE_MB",
        "STALE_FILE_MAX_AGE_HOURS",
        "DOWNLOAD_FOLDER",
        "MEMORY_THRESHOLD_PERCENT",
        "DOWNLOAD_PROXY",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_uses_defaults_when_unset() {
        clear_env();
        let config = CoordinatorConfig::from_env();
        assert_eq!(config.worker_pool_size, 8);
        assert_eq!(config.max_concurrent_per_user, 3);
        assert_eq!(config.fetch_timeout, Duration::from_secs(180));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.tools.proxy, None);
        assert_eq!(config.download_dir, PathBuf::from("downloads"));
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("WORKER_POOL_SIZE", "4");
        env::set_var("MAX_CONCURRENT_PER_USER", "2");
        env::set_var("MEMORY_THRESHOLD_PERCENT", "60.5");
        env::set_var("DOWNLOAD_PROXY", "socks5://127.0.0.1:18888");

        let config = CoordinatorConfig::from_env();
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.max_concurrent_per_user, 2);
        assert_eq!(config.resources.memory_threshold_percent, 60.5);
        assert_eq!(config.tools.proxy.as_deref(), Some("socks5://127.0.0.1:18888"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_value_falls_back() {
        clear_env();
        env::set_var("MAX_RETRIES", "many");
        let config = CoordinatorConfig::from_env();
        assert_eq!(config.max_retries, defaults::MAX_RETRIES);
        clear_env();
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(CoordinatorConfig::new().validate().is_ok());
        assert!(CoordinatorConfig::new().worker_pool_size(0).validate().is_err());
        assert!(CoordinatorConfig::new().max_concurrent_per_user(0).validate().is_err());
        assert!(CoordinatorConfig::new().max_retries(0).validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_huge_values_do_not_overflow() {
        clear_env();
        env::set_var("STALE_FILE_MAX_AGE_HOURS", u64::MAX.to_string());
        env::set_var("MAX_FILE_SIZE_MB", u64::MAX.to_string());

        let config = CoordinatorConfig::from_env();
        assert_eq!(config.stale_file_max_age, Duration::from_secs(u64::MAX));
        assert_eq!(config.max_file_size_bytes(), u64::MAX);
        assert!(config.validate().is_err());
        clear_env();
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let oversized_pool = CoordinatorConfig::new().worker_pool_size(tokio::sync::Semaphore::MAX_PERMITS + 1);
        assert!(oversized_pool.validate().is_err());
        assert!(CoordinatorConfig::new().max_file_size_mb(MAX_SIZE_MB).validate().is_ok());
        assert!(CoordinatorConfig::new().max_file_size_mb(MAX_SIZE_MB + 1).validate().is_err());

        let mut config = CoordinatorConfig::new();
        config.max_download_size_mb = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_from_hours_saturates() {
        assert_eq!(duration_from_hours(24), Duration::from_secs(86_400));
        assert_eq!(duration_from_hours(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_size_helpers() {
        let config = CoordinatorConfig::new().max_file_size_mb(50);
        assert_eq!(config.max_file_size_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.max_download_size_bytes(), 2000 * 1024 * 1024);
    }
}
