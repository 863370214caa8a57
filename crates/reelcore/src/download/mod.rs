//! Download orchestration: admission, fetching, validation and cleanup.
//!
//! - `coordinator`: the request state machine and admission control
//! - `quota`: per-user in-flight accounting
//! - `source`: fetch backends and URL routing
//! - `notifier`: user-facing progress and result events
//! - `cleanup` / `reaper`: delayed and age-based file removal

pub mod cleanup;
pub mod coordinator;
pub mod error;
pub mod notifier;
pub mod quota;
pub mod reaper;
pub mod request;
pub mod source;

pub use cleanup::CleanupScheduler;
pub use coordinator::{spawn_reaper, CoordinatorBuilder, DownloadCoordinator, DownloadHandle, ShutdownMode};
pub use error::{AdmissionDenied, FetchError, FetchErrorKind, RunError};
pub use notifier::{LogNotifier, Notifier, Stage};
pub use quota::{QuotaPermit, UserQuota};
pub use reaper::ReapReport;
pub use request::{DownloadOutcome, DownloadRequest, UserId};
pub use source::{FetchBackend, HttpBackend, SourceKind, SourceRegistry, Tool, ToolBackend};
