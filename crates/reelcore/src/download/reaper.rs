//! Stale file removal under the download root.

use serde::Serialize;
use std::path::Path;
use std::fs::Metadata;
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

/// What one reaping pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    /// Regular files looked at
    pub scanned: usize,
    pub deleted: usize,
    /// Files that could not be inspected or removed
    pub errors: usize,
}

/// Last time the file was written or had its inode changed.
///
/// Fetch tools can back-date mtime to the server's Last-Modified header; the
/// inode change time cannot be set that way, so a freshly written file always
/// looks fresh.
#[cfg(unix)]
fn last_touched(meta: &Metadata) -> std::io::Result<SystemTime> {
    use std::os::unix::fs::MetadataExt;

    let modified = meta.modified()?;
    let changed = SystemTime::UNIX_EPOCH
        + Duration::new(
            u64::try_from(meta.ctime()).unwrap_or_default(),
            u32::try_from(meta.ctime_nsec()).unwrap_or_default(),
        );
    Ok(modified.max(changed))
}

#[cfg(not(unix))]
fn last_touched(meta: &Metadata) -> std::io::Result<SystemTime> {
    meta.modified()
}

/// Deletes every regular file under `root` that has not been written or
/// changed for more than `max_age`.
///
/// Blocking; run it on the blocking pool. Per-file failures are logged and
/// counted, never returned. A missing root is an empty pass.
pub fn reap_dir(root: &Path, max_age: Duration) -> ReapReport {
    let mut report = ReapReport::default();
    if !root.exists() {
        log::debug!("Download root {} does not exist, nothing to reap", root.display());
        return report;
    }

    let now = SystemTime::now();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::error!("Failed to walk {}: {}", root.display(), e);
                report.errors += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        report.scanned += 1;

        let touched = match entry
            .metadata()
            .map_err(std::io::Error::from)
            .and_then(|m| last_touched(&m))
        {
            Ok(touched) => touched,
            Err(e) => {
                log::error!("Failed to read age of {}: {}", entry.path().display(), e);
                report.errors += 1;
                continue;
            }
        };
        // Clock skew makes future timestamps look brand new.
        let age = now.duration_since(touched).unwrap_or_default();
        if age <= max_age {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                log::info!("Removed stale file {} (age {}h)", entry.path().display(), age.as_secs() / 3600);
                report.deleted += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                log::error!("Failed to remove stale file {}: {}", entry.path().display(), e);
                report.errors += 1;
            }
        }
    }

    if report.deleted > 0 || report.errors > 0 {
        log::info!(
            "Stale file pass over {}: {} scanned, {} deleted, {} errors",
            root.display(),
            report.scanned,
            report.deleted,
            report.errors
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_root_is_empty_pass() {
        let report = reap_dir(Path::new("/nonexistent/reelgrab-root"), Duration::from_secs(1));
        assert_eq!(report, ReapReport::default());
    }

    #[test]
    fn test_young_files_survive() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("42")).unwrap();
        std::fs::write(dir.path().join("42/clip.mp4"), b"x").unwrap();

        let report = reap_dir(dir.path(), Duration::from_secs(3600));
        assert_eq!(
            report,
            ReapReport {
                scanned: 1,
                deleted: 0,
                errors: 0
            }
        );
        assert!(dir.path().join("42/clip.mp4").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_backdated_mtime_does_not_make_fresh_file_stale() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("42")).unwrap();
        let path = dir.path().join("42/in_flight.mp4");
        std::fs::write(&path, b"x").unwrap();
        // What gallery-dl does with a Last-Modified header three days old
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(72 * 3600))
            .unwrap();

        let report = reap_dir(dir.path(), Duration::from_secs(24 * 3600));
        assert_eq!(report.scanned, 1);
        assert_eq!(report.deleted, 0);
        assert!(path.exists());
    }

    #[test]
    fn test_zero_age_reaps_everything_once() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("7")).unwrap();
        std::fs::write(dir.path().join("7/a.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"x").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let first = reap_dir(dir.path(), Duration::ZERO);
        assert_eq!(first.deleted, 2);
        assert_eq!(first.errors, 0);

        let second = reap_dir(dir.path(), Duration::ZERO);
        assert_eq!(second, ReapReport::default());
        // Directories are left in place
        assert!(dir.path().join("7").is_dir());
    }
}
