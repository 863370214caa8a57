//! Download metrics.
//!
//! Two views over the same events:
//! - [`Metrics`]: the plain process-lifetime counters the coordinator hands
//!   out as a snapshot (total, succeeded, failed, cumulative processing time)
//! - a per-recorder Prometheus registry with labelled counters and a
//!   processing-time histogram, rendered in the text exposition format
//!
//! The registry is owned by the recorder rather than registered globally so
//! several coordinators (and tests) can live in one process.

use crate::core::error::AppResult;
use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

/// Snapshot of the download counters.
///
/// Counters only ever grow; they reset when the process restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cumulative_processing_time: Duration,
}

impl Metrics {
    /// Mean processing time per finished request
    pub fn average_processing_time(&self) -> Option<Duration> {
        if self.total == 0 {
            return None;
        }
        let total = u32::try_from(self.total).unwrap_or(u32::MAX);
        Some(self.cumulative_processing_time / total)
    }

    /// Percentage of finished requests that succeeded
    pub fn success_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.succeeded as f64 / self.total as f64 * 100.0)
        }
    }
}

/// Records coordinator events into the snapshot counters and Prometheus.
pub struct MetricsRecorder {
    snapshot: Mutex<Metrics>,
    registry: Registry,
    downloads_total: IntCounterVec,
    fetch_attempts_total: IntCounterVec,
    admission_denied_total: IntCounterVec,
    compressions_total: IntCounterVec,
    processing_seconds: Histogram,
    active_downloads: IntGauge,
}

impl MetricsRecorder {
    pub fn new() -> AppResult<Self> {
        let registry = Registry::new_custom(Some("reelgrab".to_string()), None)?;

        let downloads_total = IntCounterVec::new(
            Opts::new("downloads_total", "Finished download requests by result"),
            &["result"],
        )?;
        let fetch_attempts_total = IntCounterVec::new(
            Opts::new("fetch_attempts_total", "Fetch attempts by outcome kind"),
            &["kind"],
        )?;
        let admission_denied_total = IntCounterVec::new(
            Opts::new("admission_denied_total", "Requests refused at admission by reason"),
            &["reason"],
        )?;
        let compressions_total = IntCounterVec::new(
            Opts::new("compressions_total", "Oversized files sent through compression by result"),
            &["result"],
        )?;
        let processing_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "processing_duration_seconds",
                "Wall time from admission to terminal outcome",
            )
            .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        )?;
        let active_downloads = IntGauge::new("active_downloads", "Requests currently running")?;

        registry.register(Box::new(downloads_total.clone()))?;
        registry.register(Box::new(fetch_attempts_total.clone()))?;
        registry.register(Box::new(admission_denied_total.clone()))?;
        registry.register(Box::new(compressions_total.clone()))?;
        registry.register(Box::new(processing_seconds.clone()))?;
        registry.register(Box::new(active_downloads.clone()))?;

        Ok(Self {
            snapshot: Mutex::new(Metrics::default()),
            registry,
            downloads_total,
            fetch_attempts_total,
            admission_denied_total,
            compressions_total,
            processing_seconds,
            active_downloads,
        })
    }

    /// Records one terminal outcome. Called exactly once per admitted request.
    pub fn record_terminal(&self, success: bool, processing_time: Duration) {
        {
            let mut m = self.snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            m.total += 1;
            if success {
                m.succeeded += 1;
            } else {
                m.failed += 1;
            }
            m.cumulative_processing_time += processing_time;
        }

        let label = if success { "success" } else { "failure" };
        self.downloads_total.with_label_values(&[label]).inc();
        self.processing_seconds.observe(processing_time.as_secs_f64());
    }

    /// Records one fetch attempt; `kind` is `"ok"` or a fetch error kind label.
    pub fn record_attempt(&self, kind: &str) {
        self.fetch_attempts_total.with_label_values(&[kind]).inc();
    }

    pub fn record_denial(&self, reason: &str) {
        self.admission_denied_total.with_label_values(&[reason]).inc();
    }

    /// `applied` or `fallback`
    pub fn record_compression(&self, result: &str) {
        self.compressions_total.with_label_values(&[result]).inc();
    }

    pub fn request_started(&self) {
        self.active_downloads.inc();
    }

    pub fn request_finished(&self) {
        self.active_downloads.dec();
    }

    /// Copy of the counters taken under the lock.
    pub fn snapshot(&self) -> Metrics {
        *self.snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> AppResult<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_terminal_updates_snapshot() {
        let recorder = MetricsRecorder::new().unwrap();
        recorder.record_terminal(true, Duration::from_secs(3));
        recorder.record_terminal(false, Duration::from_secs(1));
        recorder.record_terminal(true, Duration::from_secs(2));

        let m = recorder.snapshot();
        assert_eq!(
            m,
            Metrics {
                total: 3,
                succeeded: 2,
                failed: 1,
                cumulative_processing_time: Duration::from_secs(6),
            }
        );
        assert_eq!(m.average_processing_time(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_empty_metrics_have_no_rates() {
        let m = Metrics::default();
        assert_eq!(m.average_processing_time(), None);
        assert_eq!(m.success_rate(), None);
    }

    #[test]
    fn test_render_contains_prefixed_families() {
        let recorder = MetricsRecorder::new().unwrap();
        recorder.record_terminal(true, Duration::from_millis(500));
        recorder.record_attempt("timeout");
        recorder.record_denial("quota");

        let text = recorder.render().unwrap();
        assert!(text.contains("reelgrab_downloads_total{result=\"success\"} 1"));
        assert!(text.contains("reelgrab_fetch_attempts_total{kind=\"timeout\"} 1"));
        assert!(text.contains("reelgrab_admission_denied_total{reason=\"quota\"} 1"));
        assert!(text.contains("reelgrab_processing_duration_seconds_count 1"));
    }

    #[test]
    fn test_two_recorders_do_not_collide() {
        let a = MetricsRecorder::new().unwrap();
        let b = MetricsRecorder::new().unwrap();
        a.record_terminal(true, Duration::ZERO);
        assert_eq!(a.snapshot().total, 1);
        assert_eq!(b.snapshot().total, 0);
    }
}
