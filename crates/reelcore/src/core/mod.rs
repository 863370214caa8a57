//! Core utilities: configuration, errors, logging, metrics, retry and host resources

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod process;
pub mod resource;
pub mod retry;

// Re-exports for convenience
pub use config::{duration_from_hours, CoordinatorConfig, ResourceLimits, ToolConfig};
pub use error::{AppError, AppResult};
pub use logging::init_logger;
pub use metrics::{Metrics, MetricsRecorder};
pub use resource::{ResourceCheck, ResourceGate, ResourceSampler, ResourceSnapshot, SysinfoSampler};
pub use retry::{retry, RetryError, RetryPolicy, RetryResult, Retryable};
