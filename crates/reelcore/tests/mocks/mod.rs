//! Test doubles for the download coordinator
//!
//! Nothing in here touches the network or spawns yt-dlp/ffmpeg. Files are
//! written into a temporary download root so delivery, compression and
//! cleanup run against a real filesystem.
#![allow(dead_code)]

pub mod mock_backend;
pub mod mock_env;
pub mod mock_media;

pub use mock_backend::{ScriptedBackend, Step};
pub use mock_env::{FailingNotifier, FixedSampler, RecordingNotifier};
pub use mock_media::{CompressMode, MockInspector};

use reelcore::{CoordinatorConfig, DownloadCoordinator, FetchBackend, Notifier, SourceKind, SourceRegistry};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Small limits so tests stay fast: 1 MB ceiling, 3 attempts 10 ms apart.
pub fn test_config(root: &Path) -> CoordinatorConfig {
    CoordinatorConfig::default()
        .download_dir(root)
        .worker_pool_size(4)
        .max_concurrent_per_user(2)
        .max_retries(3)
        .retry_delay(Duration::from_millis(10))
        .fetch_timeout(Duration::from_secs(180))
        .max_file_size_mb(1)
        .cleanup_delay(Duration::from_secs(600))
}

/// Routes every source kind to `backend`.
pub fn registry_for(backend: Arc<dyn FetchBackend>) -> SourceRegistry {
    [
        SourceKind::YouTube,
        SourceKind::Twitter,
        SourceKind::Instagram,
        SourceKind::DirectFile,
        SourceKind::Other,
    ]
    .into_iter()
    .fold(SourceRegistry::new(), |registry, kind| registry.with(kind, backend.clone()))
}

pub fn coordinator(
    config: CoordinatorConfig,
    backend: Arc<dyn FetchBackend>,
    inspector: Arc<MockInspector>,
    notifier: Arc<dyn Notifier>,
) -> Arc<DownloadCoordinator> {
    let coordinator = DownloadCoordinator::builder(config)
        .registry(registry_for(backend))
        .inspector(inspector)
        .notifier(notifier)
        .sampler(Arc::new(FixedSampler::idle()))
        .build()
        .expect("coordinator config is valid");
    Arc::new(coordinator)
}

/// One MB plus a bit, just over the test ceiling
pub const OVERSIZED: usize = 1024 * 1024 + 4096;
