//! Download coordinator: admission, lifecycle and housekeeping.
//!
//! One coordinator is built at startup and shared as `Arc`. It owns the
//! per-user quota, the metrics and the worker pool, and drives every admitted
//! request through
//!
//! ```text
//! ADMITTED -> FETCHING -> VALIDATING -> (COMPRESSING) -> DONE | FAILED
//! ```
//!
//! Fetching is retried under the shared [`RetryPolicy`]; validation failures
//! are terminal; compression failures fall back to the original file.

use crate::core::config::CoordinatorConfig;
use crate::core::error::AppResult;
use crate::core::metrics::{Metrics, MetricsRecorder};
use crate::core::resource::{ResourceGate, ResourceSampler};
use crate::core::retry::{retry, RetryPolicy};
use crate::download::cleanup::CleanupScheduler;
use crate::download::error::{AdmissionDenied, FetchError, RunError};
use crate::download::notifier::{notify_progress, notify_result, LogNotifier, Notifier, Stage};
use crate::download::quota::{QuotaPermit, UserQuota};
use crate::download::reaper::{reap_dir, ReapReport};
use crate::download::request::{DownloadOutcome, DownloadRequest, UserId};
use crate::download::source::{FetchBackend, SourceRegistry};
use crate::media::{target_bitrate_kbps, FfmpegInspector, MediaInspector};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

/// What to do with pending delayed deletions on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Delete every delivered file now
    Drain,
    /// Leave delivered files for the stale-file reaper
    Abandon,
}

/// A file that made it through the pipeline.
#[derive(Debug)]
struct Delivered {
    path: PathBuf,
    size_bytes: u64,
    fetch_duration: Duration,
    compressed: bool,
}

/// Keeps the active-downloads gauge in step with running requests.
struct ActiveRequest<'a>(&'a MetricsRecorder);

impl<'a> ActiveRequest<'a> {
    fn start(metrics: &'a MetricsRecorder) -> Self {
        metrics.request_started();
        Self(metrics)
    }
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        self.0.request_finished();
    }
}

/// Handle to a submitted request.
#[derive(Debug)]
pub struct DownloadHandle {
    request_id: String,
    join: JoinHandle<DownloadOutcome>,
}

impl DownloadHandle {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Waits for the terminal outcome.
    ///
    /// Dropping the handle instead lets the request run to completion.
    pub async fn outcome(self) -> DownloadOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Download task {} did not complete: {}", self.request_id, e);
                DownloadOutcome::Failure {
                    reason: format!("download task did not complete: {}", e),
                    attempts_made: 0,
                }
            }
        }
    }
}

/// Builds a [`DownloadCoordinator`]; every collaborator has a production default.
#[must_use]
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    registry: Option<SourceRegistry>,
    inspector: Option<Arc<dyn MediaInspector>>,
    notifier: Option<Arc<dyn Notifier>>,
    sampler: Option<Arc<dyn ResourceSampler>>,
    retry_policy: Option<RetryPolicy>,
}

impl CoordinatorBuilder {
    pub fn registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn inspector(mut self, inspector: Arc<dyn MediaInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replaces the host sampler behind the resource gate.
    pub fn sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Overrides the fixed-delay policy derived from the config.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> AppResult<DownloadCoordinator> {
        let config = self.config;
        config.validate()?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => SourceRegistry::default_registry(&config)?,
        };
        let gate = match self.sampler {
            Some(sampler) => ResourceGate::new(config.resources.clone(), sampler),
            None => ResourceGate::system(config.resources.clone()),
        };
        let retry_policy = self
            .retry_policy
            .unwrap_or_else(|| RetryPolicy::fixed(config.max_retries, config.retry_delay));

        log::info!(
            "Download coordinator: {} workers, {} per user, fetch timeout {:?}, {} attempts, root {}",
            config.worker_pool_size,
            config.max_concurrent_per_user,
            config.fetch_timeout,
            retry_policy.max_attempts,
            config.download_dir.display()
        );
        log::debug!("Fetch backends: {:?}", registry);

        Ok(DownloadCoordinator {
            gate: Arc::new(gate),
            quota: UserQuota::new(config.max_concurrent_per_user),
            admission: Mutex::new(()),
            registry,
            inspector: self.inspector.unwrap_or_else(|| Arc::new(FfmpegInspector::new())),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            metrics: MetricsRecorder::new()?,
            retry_policy,
            workers: Arc::new(Semaphore::new(config.worker_pool_size)),
            tasks: TaskTracker::new(),
            cleanup: CleanupScheduler::new(),
            shutdown: CancellationToken::new(),
            config,
        })
    }
}

/// Admission control and lifecycle management for download requests.
pub struct DownloadCoordinator {
    config: CoordinatorConfig,
    gate: Arc<ResourceGate>,
    quota: Arc<UserQuota>,
    /// Serialises the gate check with the quota check-and-increment
    admission: Mutex<()>,
    registry: SourceRegistry,
    inspector: Arc<dyn MediaInspector>,
    notifier: Arc<dyn Notifier>,
    metrics: MetricsRecorder,
    retry_policy: RetryPolicy,
    workers: Arc<Semaphore>,
    tasks: TaskTracker,
    cleanup: CleanupScheduler,
    shutdown: CancellationToken,
}

impl DownloadCoordinator {
    pub fn builder(config: CoordinatorConfig) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            registry: None,
            inspector: None,
            notifier: None,
            sampler: None,
            retry_policy: None,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Decides whether `user_id` may start another download and, if so,
    /// reserves the slot.
    ///
    /// The resource gate is consulted first; a veto leaves the quota
    /// untouched. The returned permit gives the slot back when dropped.
    pub async fn can_admit(&self, user_id: UserId) -> Result<QuotaPermit, AdmissionDenied> {
        let _admission = self.admission.lock().await;

        let gate = Arc::clone(&self.gate);
        let check = match tokio::task::spawn_blocking(move || gate.check()).await {
            Ok(check) => check,
            Err(e) => {
                log::error!("Resource check task failed: {}", e);
                return Err(self.deny(
                    user_id,
                    AdmissionDenied::ResourceConstrained("unable to read system resources".to_string()),
                ));
            }
        };
        if !check.ok {
            return Err(self.deny(user_id, AdmissionDenied::ResourceConstrained(check.reason)));
        }

        self.quota.try_acquire(user_id).map_err(|denied| self.deny(user_id, denied))
    }

    fn deny(&self, user_id: UserId, denied: AdmissionDenied) -> AdmissionDenied {
        log::warn!("Refused download for user {}: {}", user_id, denied);
        self.metrics.record_denial(denied.label());
        denied
    }

    /// Admits the request and hands it to the worker pool.
    ///
    /// Returns as soon as the request is admitted; the handle resolves to the
    /// outcome.
    pub async fn submit(self: &Arc<Self>, user_id: UserId, url: Url) -> Result<DownloadHandle, AdmissionDenied> {
        let permit = self.can_admit(user_id).await?;
        let request = DownloadRequest::new(user_id, url);
        let request_id = request.request_id.clone();
        log::info!(
            "Admitted request {} for user {}: {}",
            request.request_id,
            user_id,
            request.source_url
        );

        let this = Arc::clone(self);
        let join = self.tasks.spawn(async move {
            // The pool semaphore is never closed.
            let _worker = Arc::clone(&this.workers).acquire_owned().await.ok();
            this.run(request, permit).await
        });

        Ok(DownloadHandle { request_id, join })
    }

    /// Drives one admitted request to its terminal outcome.
    ///
    /// The permit is held for the whole run and released on every exit path.
    /// Exactly one terminal metric is recorded and one result notification
    /// is sent.
    pub async fn run(&self, request: DownloadRequest, permit: QuotaPermit) -> DownloadOutcome {
        let _permit = permit;
        let _active = ActiveRequest::start(&self.metrics);
        let started = Instant::now();
        let attempts = AtomicU32::new(0);

        notify_progress(self.notifier.as_ref(), &request.request_id, &Stage::Admitted).await;

        let result = AssertUnwindSafe(self.execute(&request, &attempts))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                log::error!("Request {} panicked", request.request_id);
                Err(RunError::Io(std::io::Error::other("download task panicked")))
            });

        let outcome = match result {
            Ok(delivered) => DownloadOutcome::Success {
                file_path: delivered.path,
                size_bytes: delivered.size_bytes,
                fetch_duration: delivered.fetch_duration,
                total_duration: started.elapsed(),
                compressed: delivered.compressed,
            },
            Err(e) => {
                log::error!(
                    "Request {} for user {} failed [{}]: {}",
                    request.request_id,
                    request.user_id,
                    e.subcategory(),
                    e
                );
                DownloadOutcome::Failure {
                    reason: e.to_string(),
                    attempts_made: attempts.load(Ordering::SeqCst),
                }
            }
        };

        self.metrics.record_terminal(outcome.is_success(), started.elapsed());
        notify_result(self.notifier.as_ref(), &request.request_id, &outcome).await;

        if let Some(path) = outcome.file_path() {
            self.cleanup.schedule(path.to_path_buf(), self.config.cleanup_delay);
        }
        outcome
    }

    async fn execute(&self, request: &DownloadRequest, attempts: &AtomicU32) -> Result<Delivered, RunError> {
        let user_dir = self.config.download_dir.join(request.user_id.to_string());

        let backend = match self.registry.resolve(&request.source_url) {
            Ok(backend) => backend,
            Err(e) => {
                attempts.store(1, Ordering::SeqCst);
                self.metrics.record_attempt(e.kind.label());
                return Err(e.into());
            }
        };
        tokio::fs::create_dir_all(&user_dir).await?;

        let fetch_started = Instant::now();
        let path = self.fetch(request, backend.as_ref(), &user_dir, attempts).await?;
        let fetch_duration = fetch_started.elapsed();

        notify_progress(self.notifier.as_ref(), &request.request_id, &Stage::Validating).await;
        self.validate(&path).await?;

        let (path, compressed) = self.maybe_compress(request, path).await;
        let size_bytes = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                remove_quietly(&path).await;
                return Err(e.into());
            }
        };
        let path = self.deliver(path).await;

        log::info!(
            "Request {} done: {} ({:.2} MB)",
            request.request_id,
            path.display(),
            size_bytes as f64 / (1024.0 * 1024.0)
        );
        Ok(Delivered {
            path,
            size_bytes,
            fetch_duration,
            compressed,
        })
    }

    /// FETCHING with retries. Each attempt runs under a hard timeout.
    async fn fetch(
        &self,
        request: &DownloadRequest,
        backend: &dyn FetchBackend,
        user_dir: &Path,
        attempts: &AtomicU32,
    ) -> Result<PathBuf, FetchError> {
        let policy = &self.retry_policy;
        let max_attempts = policy.max_attempts.max(1);
        let timeout = self.config.fetch_timeout;

        let result = retry(policy, move |attempt| async move {
            attempts.store(attempt, Ordering::SeqCst);
            notify_progress(
                self.notifier.as_ref(),
                &request.request_id,
                &Stage::Fetching { attempt, max_attempts },
            )
            .await;
            log::info!(
                "Request {}: {} attempt {}/{}",
                request.request_id,
                backend.name(),
                attempt,
                max_attempts
            );

            let result = match tokio::time::timeout(timeout, backend.fetch(&request.source_url, user_dir, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::timeout(format!(
                    "no result within {}s",
                    timeout.as_secs()
                ))),
            };

            match &result {
                Ok(path) => {
                    self.metrics.record_attempt("ok");
                    log::info!("Request {} fetched {}", request.request_id, path.display());
                }
                Err(e) => {
                    self.metrics.record_attempt(e.kind.label());
                    if e.kind.is_retryable() && attempt < max_attempts {
                        let stage = Stage::Retrying {
                            next_attempt: attempt + 1,
                            delay: policy.delay,
                            reason: e.kind.to_string(),
                        };
                        notify_progress(self.notifier.as_ref(), &request.request_id, &stage).await;
                    }
                }
            }
            result
        })
        .await;

        result.result.map_err(|e| e.into_last_error())
    }

    /// VALIDATING. A file without a video stream is removed and the request
    /// fails without further fetch attempts.
    async fn validate(&self, path: &Path) -> Result<(), RunError> {
        let reason = match self.inspector.check_integrity(path).await {
            Ok(true) => return Ok(()),
            Ok(false) => "no video stream found".to_string(),
            Err(e) => e.to_string(),
        };
        log::warn!("Corrupt download {}: {}", path.display(), reason);
        remove_quietly(path).await;
        Err(RunError::CorruptDownload(reason))
    }

    /// COMPRESSING, only for files above the size ceiling. Any failure keeps
    /// the original file.
    async fn maybe_compress(&self, request: &DownloadRequest, path: PathBuf) -> (PathBuf, bool) {
        let ceiling = self.config.max_file_size_bytes();
        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                log::warn!("Cannot stat {}: {}", path.display(), e);
                return (path, false);
            }
        };
        if size <= ceiling {
            return (path, false);
        }

        let fallback = |reason: String| {
            log::warn!(
                "Compression of {} skipped, sending original: {}",
                path.display(),
                reason
            );
            self.metrics.record_compression("fallback");
        };

        let duration = match self.inspector.probe_duration(&path).await {
            Ok(duration) => duration,
            Err(e) => {
                fallback(e.to_string());
                return (path, false);
            }
        };
        let Some(target_kbps) = target_bitrate_kbps(self.config.max_file_size_mb, duration) else {
            fallback(format!("unusable duration {}", duration));
            return (path, false);
        };

        let stage = Stage::Compressing {
            size_mb: size as f64 / (1024.0 * 1024.0),
            target_kbps,
        };
        notify_progress(self.notifier.as_ref(), &request.request_id, &stage).await;

        let compressed = match self.inspector.compress(&path, target_kbps).await {
            Ok(compressed) => compressed,
            Err(e) => {
                fallback(e.to_string());
                return (path, false);
            }
        };

        let new_size = match tokio::fs::metadata(&compressed).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                fallback(format!("compressed output unreadable: {}", e));
                return (path, false);
            }
        };
        if new_size >= ceiling {
            fallback(format!(
                "compressed output still {:.1} MB",
                new_size as f64 / (1024.0 * 1024.0)
            ));
            remove_quietly(&compressed).await;
            return (path, false);
        }

        log::info!(
            "Compressed {}: {:.1} MB -> {:.1} MB",
            path.display(),
            size as f64 / (1024.0 * 1024.0),
            new_size as f64 / (1024.0 * 1024.0)
        );
        self.metrics.record_compression("applied");
        remove_quietly(&path).await;
        (compressed, true)
    }

    /// Moves the file to `<root>/<uuid>_<basename>`. If the rename fails the
    /// file is delivered where it is. Either way its mtime is set to now so
    /// the reaper measures age from delivery.
    async fn deliver(&self, path: PathBuf) -> PathBuf {
        let Some(name) = path.file_name() else {
            return path;
        };
        let target = self.config.download_dir.join(format!(
            "{}_{}",
            uuid::Uuid::new_v4(),
            name.to_string_lossy()
        ));
        let delivered = match tokio::fs::rename(&path, &target).await {
            Ok(()) => target,
            Err(e) => {
                log::warn!("Failed to move {} to {}: {}", path.display(), target.display(), e);
                path
            }
        };
        touch(&delivered).await;
        delivered
    }

    /// Copy of the counters taken under lock.
    pub fn metrics(&self) -> Metrics {
        self.metrics.snapshot()
    }

    /// Prometheus text exposition of this coordinator's metrics.
    pub fn render_metrics(&self) -> AppResult<String> {
        self.metrics.render()
    }

    /// Downloads currently in flight for `user_id`.
    pub fn active_downloads(&self, user_id: UserId) -> usize {
        self.quota.active(user_id)
    }

    /// Delayed deletions not yet carried out.
    pub fn pending_cleanups(&self) -> usize {
        self.cleanup.pending()
    }

    /// Removes files under the download root older than `max_age`.
    pub async fn reap_stale(&self, max_age: Duration) -> ReapReport {
        let root = self.config.download_dir.clone();
        match tokio::task::spawn_blocking(move || reap_dir(&root, max_age)).await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Stale file pass failed: {}", e);
                ReapReport {
                    errors: 1,
                    ..ReapReport::default()
                }
            }
        }
    }

    /// Waits for running requests, then handles pending deletions per `mode`.
    /// The periodic reaper stops as well.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        log::info!("Shutting down download coordinator ({:?})", mode);
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        match mode {
            ShutdownMode::Drain => self.cleanup.drain().await,
            ShutdownMode::Abandon => self.cleanup.abandon().await,
        }
    }
}

/// Runs [`DownloadCoordinator::reap_stale`] with the configured age every
/// `interval` until the coordinator shuts down. The first pass runs right away.
pub fn spawn_reaper(coordinator: Arc<DownloadCoordinator>, interval: Duration) -> JoinHandle<()> {
    let stop = coordinator.shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    log::debug!("Stale file reaper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let max_age = coordinator.config.stale_file_max_age;
                    coordinator.reap_stale(max_age).await;
                }
            }
        }
    })
}

async fn touch(path: &Path) {
    let target = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&target)?
            .set_modified(SystemTime::now())
    })
    .await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Failed to reset mtime of {}: {}", path.display(), e),
        Err(e) => log::warn!("Failed to reset mtime of {}: {}", path.display(), e),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
