//! Resource sampler and notifiers for coordinator tests

use async_trait::async_trait;
use reelcore::core::{ResourceSampler, ResourceSnapshot};
use reelcore::{AppError, DownloadOutcome, Notifier};
use std::sync::Mutex;

/// Always reports the same readings
pub struct FixedSampler(pub ResourceSnapshot);

impl FixedSampler {
    pub fn idle() -> Self {
        Self(ResourceSnapshot {
            memory_used_percent: 40.0,
            available_memory_mb: 8192.0,
            cpu_percent: 10.0,
        })
    }

    pub fn memory_used(percent: f64) -> Self {
        Self(ResourceSnapshot {
            memory_used_percent: percent,
            ..Self::idle().0
        })
    }
}

impl ResourceSampler for FixedSampler {
    fn sample(&self) -> Result<ResourceSnapshot, AppError> {
        Ok(self.0)
    }
}

/// Keeps every message it is sent
#[derive(Default)]
pub struct RecordingNotifier {
    progress: Mutex<Vec<(String, String)>>,
    results: Mutex<Vec<(String, DownloadOutcome)>>,
}

impl RecordingNotifier {
    pub fn progress_texts(&self, request_id: &str) -> Vec<String> {
        self.progress
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == request_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn results(&self) -> Vec<(String, DownloadOutcome)> {
        self.results.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn on_progress(&self, request_id: &str, text: &str) -> Result<(), AppError> {
        self.progress
            .lock()
            .unwrap()
            .push((request_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn on_result(&self, request_id: &str, outcome: &DownloadOutcome) -> Result<(), AppError> {
        self.results
            .lock()
            .unwrap()
            .push((request_id.to_string(), outcome.clone()));
        Ok(())
    }
}

/// Fails every delivery, like a chat API that is down
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn on_progress(&self, _request_id: &str, _text: &str) -> Result<(), AppError> {
        Err(AppError::Config("chat API unreachable".to_string()))
    }

    async fn on_result(&self, _request_id: &str, _outcome: &DownloadOutcome) -> Result<(), AppError> {
        Err(AppError::Config("chat API unreachable".to_string()))
    }
}
