//! Host resource monitoring and admission veto
//!
//! The gate samples memory and CPU and refuses new downloads while the host
//! is under pressure. Sampling blocks for the CPU window, so callers on an
//! async runtime must go through `spawn_blocking`.

use crate::core::config::ResourceLimits;
use crate::core::error::AppError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

/// Point-in-time host readings. Stale as soon as it is read; never cache it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSnapshot {
    /// Used memory (0-100)
    pub memory_used_percent: f64,
    /// Available memory in MB
    pub available_memory_mb: f64,
    /// Global CPU usage (0-100)
    pub cpu_percent: f64,
}

/// Verdict of a resource check.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCheck {
    pub ok: bool,
    /// Empty when `ok`
    pub reason: String,
}

impl ResourceCheck {
    fn allowed() -> Self {
        Self {
            ok: true,
            reason: String::new(),
        }
    }

    fn denied(reason: String) -> Self {
        Self { ok: false, reason }
    }
}

/// Source of resource snapshots.
pub trait ResourceSampler: Send + Sync {
    /// Takes one sample. May block for the CPU sampling window.
    fn sample(&self) -> Result<ResourceSnapshot, AppError>;
}

/// Samples the real host through `sysinfo`.
pub struct SysinfoSampler {
    system: Mutex<System>,
    cpu_window: Duration,
}

impl SysinfoSampler {
    pub fn new(cpu_window: Duration) -> Self {
        Self {
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::new()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            )),
            cpu_window: cpu_window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> Result<ResourceSnapshot, AppError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| AppError::Config("resource sampler lock poisoned".to_string()))?;

        // CPU usage is a delta between two refreshes.
        system.refresh_cpu_usage();
        std::thread::sleep(self.cpu_window);
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(AppError::Config("total memory reported as zero".to_string()));
        }
        let used = system.used_memory();

        Ok(ResourceSnapshot {
            memory_used_percent: used as f64 / total as f64 * 100.0,
            available_memory_mb: system.available_memory() as f64 / 1024.0 / 1024.0,
            cpu_percent: f64::from(system.global_cpu_usage()),
        })
    }
}

/// Vetoes new work when the host is constrained.
#[derive(Clone)]
pub struct ResourceGate {
    limits: ResourceLimits,
    sampler: Arc<dyn ResourceSampler>,
}

impl ResourceGate {
    pub fn new(limits: ResourceLimits, sampler: Arc<dyn ResourceSampler>) -> Self {
        Self { limits, sampler }
    }

    /// Gate backed by the real host.
    pub fn system(limits: ResourceLimits) -> Self {
        let sampler = Arc::new(SysinfoSampler::new(limits.cpu_sample_window));
        Self::new(limits, sampler)
    }

    /// Samples the host and evaluates the thresholds.
    ///
    /// Conditions are checked in a fixed order (memory percent, available
    /// memory, CPU) and the first violation is reported.
    pub fn check(&self) -> ResourceCheck {
        match self.sampler.sample() {
            Ok(snapshot) => self.evaluate(&snapshot),
            Err(e) => {
                log::error!("Failed to sample system resources: {}", e);
                ResourceCheck::denied("unable to read system resources".to_string())
            }
        }
    }

    /// Applies the thresholds to an already taken snapshot.
    pub fn evaluate(&self, snapshot: &ResourceSnapshot) -> ResourceCheck {
        if snapshot.memory_used_percent > self.limits.memory_threshold_percent {
            return ResourceCheck::denied(format!(
                "system memory usage too high: {:.1}%",
                snapshot.memory_used_percent
            ));
        }

        if snapshot.available_memory_mb < self.limits.min_available_memory_mb {
            return ResourceCheck::denied(format!(
                "not enough available memory: {:.1}MB",
                snapshot.available_memory_mb
            ));
        }

        if snapshot.cpu_percent > self.limits.cpu_threshold_percent {
            return ResourceCheck::denied(format!("CPU usage too high: {:.1}%", snapshot.cpu_percent));
        }

        log::debug!(
            "Resources OK: memory {:.1}% used, {:.0}MB available, CPU {:.1}%",
            snapshot.memory_used_percent,
            snapshot.available_memory_mb,
            snapshot.cpu_percent
        );
        ResourceCheck::allowed()
    }
}
