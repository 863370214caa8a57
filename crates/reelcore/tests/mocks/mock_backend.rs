//! Scripted fetch backends
//!
//! Each call to `fetch` consumes the next step of a script; once the script
//! runs out the last step repeats. Successful steps write a file of the
//! requested size into the destination directory, like a real downloader.

use async_trait::async_trait;
use reelcore::{FetchBackend, FetchError, FetchErrorKind};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use url::Url;

/// One scripted fetch attempt
#[derive(Debug, Clone)]
pub enum Step {
    /// Writes a file of `size` bytes and returns it
    Ok { size: usize },
    /// Waits `delay`, then behaves like `Ok`
    Slow { delay: Duration, size: usize },
    /// Like `Ok`, but with the mtime set `age` in the past, as a tool that
    /// honours Last-Modified would leave it
    Backdated { size: usize, age: Duration },
    /// Reports success with a path that was never written
    Missing,
    /// Fails with the given kind
    Fail(FetchErrorKind),
    /// Never completes; only the coordinator timeout ends it
    Hang,
    Panic,
}

pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        let last = steps.last().cloned().unwrap_or(Step::Ok { size: 1024 });
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(last),
            calls: AtomicU32::new(0),
        })
    }

    pub fn always(step: Step) -> Arc<Self> {
        Self::new(vec![step])
    }

    /// Number of fetch calls so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        match self.steps.lock().unwrap().pop_front() {
            Some(step) => step,
            None => self.last.lock().unwrap().clone(),
        }
    }
}

async fn write_file(dest_dir: &Path, size: usize) -> Result<PathBuf, FetchError> {
    let path = dest_dir.join(format!("{}_clip.mp4", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&path, vec![0u8; size]).await?;
    Ok(path)
}

#[async_trait]
impl FetchBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, _url: &Url, dest_dir: &Path, _timeout: Duration) -> Result<PathBuf, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Ok { size } => write_file(dest_dir, size).await,
            Step::Slow { delay, size } => {
                tokio::time::sleep(delay).await;
                write_file(dest_dir, size).await
            }
            Step::Backdated { size, age } => {
                let path = write_file(dest_dir, size).await?;
                std::fs::File::options()
                    .write(true)
                    .open(&path)?
                    .set_modified(SystemTime::now() - age)?;
                Ok(path)
            }
            Step::Missing => Ok(dest_dir.join("never_written.mp4")),
            Step::Fail(kind) => Err(FetchError::new(kind, format!("scripted {} failure", kind.label()))),
            Step::Hang => std::future::pending().await,
            Step::Panic => panic!("scripted backend panic"),
        }
    }
}
