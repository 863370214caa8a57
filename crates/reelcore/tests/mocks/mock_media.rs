//! Media inspector stand-in that never spawns ffmpeg

use async_trait::async_trait;
use reelcore::media::{compressed_path, CompressError, MediaInspector, ProbeError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub enum CompressMode {
    Fail,
    /// Writes a compressed file of this many bytes
    Produce(usize),
}

#[derive(Debug)]
pub struct MockInspector {
    pub valid: bool,
    pub duration: Option<f64>,
    pub compress_mode: CompressMode,
    integrity_calls: AtomicU32,
    compress_calls: AtomicU32,
}

impl MockInspector {
    /// Valid video, 120 s long, compression succeeds with a tiny file
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::with(true, Some(120.0), CompressMode::Produce(1024)))
    }

    pub fn corrupt() -> Arc<Self> {
        Arc::new(Self::with(false, Some(120.0), CompressMode::Fail))
    }

    pub fn compressing(mode: CompressMode) -> Arc<Self> {
        Arc::new(Self::with(true, Some(120.0), mode))
    }

    pub fn with(valid: bool, duration: Option<f64>, compress_mode: CompressMode) -> Self {
        Self {
            valid,
            duration,
            compress_mode,
            integrity_calls: AtomicU32::new(0),
            compress_calls: AtomicU32::new(0),
        }
    }

    pub fn integrity_calls(&self) -> u32 {
        self.integrity_calls.load(Ordering::SeqCst)
    }

    pub fn compress_calls(&self) -> u32 {
        self.compress_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaInspector for MockInspector {
    async fn probe_duration(&self, _path: &Path) -> Result<f64, ProbeError> {
        self.duration
            .ok_or_else(|| ProbeError::ToolFailed("mock probe failure".to_string()))
    }

    async fn check_integrity(&self, _path: &Path) -> Result<bool, ProbeError> {
        self.integrity_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.valid)
    }

    async fn compress(&self, path: &Path, _target_kbps: u64) -> Result<PathBuf, CompressError> {
        self.compress_calls.fetch_add(1, Ordering::SeqCst);
        match self.compress_mode {
            CompressMode::Fail => Err(CompressError::FfmpegError("mock encoder crashed".to_string())),
            CompressMode::Produce(size) => {
                let output = compressed_path(path);
                tokio::fs::write(&output, vec![0u8; size]).await?;
                Ok(output)
            }
        }
    }
}
