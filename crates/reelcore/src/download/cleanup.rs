//! Delayed deletion of delivered files.
//!
//! A delivered file has to outlive the upload to the user, so it is removed a
//! fixed delay after the outcome is reported. Pending deletions are tracked so
//! shutdown can either run them all right away (`drain`) or drop them and
//! leave the files to the stale-file reaper (`abandon`).

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone)]
pub struct CleanupScheduler {
    tracker: TaskTracker,
    /// Cancelled by `drain`: pending deletions run immediately
    flush: CancellationToken,
    /// Cancelled by `abandon`: pending deletions are dropped
    abort: CancellationToken,
}

impl Default for CleanupScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupScheduler {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            flush: CancellationToken::new(),
            abort: CancellationToken::new(),
        }
    }

    /// Deletes `path` after `delay`. Must be called from within a tokio runtime.
    pub fn schedule(&self, path: PathBuf, delay: Duration) {
        let flush = self.flush.clone();
        let abort = self.abort.clone();

        log::debug!("Scheduling deletion of {} in {:?}", path.display(), delay);
        self.tracker.spawn(async move {
            tokio::select! {
                _ = abort.cancelled() => {
                    log::debug!("Deletion of {} abandoned", path.display());
                    return;
                }
                _ = flush.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            remove_delivered(&path).await;
        });
    }

    /// Number of deletions still waiting.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Runs every pending deletion now and waits for them to finish.
    pub async fn drain(&self) {
        let pending = self.tracker.len();
        if pending > 0 {
            log::info!("Draining {} pending file deletion(s)", pending);
        }
        self.flush.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Drops every pending deletion, leaving the files on disk.
    pub async fn abandon(&self) {
        let pending = self.tracker.len();
        if pending > 0 {
            log::warn!("Abandoning {} pending file deletion(s)", pending);
        }
        self.abort.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn remove_delivered(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::info!("Deleted delivered file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("Delivered file {} already gone", path.display())
        }
        Err(e) => log::warn!("Failed to delete delivered file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"video").unwrap();
        path
    }

    #[tokio::test]
    async fn test_deletes_after_delay() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.mp4");
        let scheduler = CleanupScheduler::new();

        scheduler.schedule(path.clone(), Duration::from_millis(20));
        assert_eq!(scheduler.pending(), 1);
        assert!(path.exists());

        for _ in 0..100 {
            if scheduler.pending() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(scheduler.pending(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drain_deletes_immediately() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir, "a.mp4");
        let b = touch(&dir, "b.mp4");
        let scheduler = CleanupScheduler::new();

        scheduler.schedule(a.clone(), Duration::from_secs(3600));
        scheduler.schedule(b.clone(), Duration::from_secs(3600));
        scheduler.drain().await;

        assert_eq!(scheduler.pending(), 0);
        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[tokio::test]
    async fn test_abandon_keeps_files() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir, "a.mp4");
        let scheduler = CleanupScheduler::new();

        scheduler.schedule(a.clone(), Duration::from_secs(3600));
        scheduler.abandon().await;

        assert_eq!(scheduler.pending(), 0);
        assert!(a.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let scheduler = CleanupScheduler::new();
        scheduler.schedule(dir.path().join("never-existed.mp4"), Duration::ZERO);
        scheduler.drain().await;
        assert_eq!(scheduler.pending(), 0);
    }
}
