mod cli;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use cli::{parse_batch_line, Cli, Commands};
use reelcore::core::{duration_from_hours, ResourceGate};
use reelcore::{
    init_logger, spawn_reaper, AdmissionDenied, AppError, CoordinatorConfig, DownloadCoordinator, DownloadHandle,
    DownloadOutcome, FfmpegInspector, Notifier, ShutdownMode,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use url::Url;

/// How often the stale file reaper runs while the process is alive
const REAP_INTERVAL: Duration = Duration::from_secs(3600);

/// Prints progress to stderr so stdout stays machine readable.
struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn on_progress(&self, request_id: &str, text: &str) -> Result<(), AppError> {
        eprintln!("[{}] {}", short_id(request_id), text);
        Ok(())
    }

    async fn on_result(&self, request_id: &str, outcome: &DownloadOutcome) -> Result<(), AppError> {
        eprintln!("[{}] {}", short_id(request_id), outcome.summary());
        Ok(())
    }
}

fn short_id(request_id: &str) -> &str {
    request_id.get(..8).unwrap_or(request_id)
}

/// Counts of a batch run
#[derive(Debug, Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
    refused: usize,
}

/// Entry point for the reelgrab CLI
///
/// # Errors
/// Returns an error if initialization fails or the requested download does
/// not succeed.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present
    let _ = dotenvy::dotenv();
    let config = CoordinatorConfig::from_env();
    init_logger(&config.log_file_path)?;

    match cli.command {
        Commands::Fetch { ref url, user } => fetch(config, user, url, &cli).await,
        Commands::Batch => batch(config, &cli).await,
        Commands::Reap { max_age_hours } => reap(config, max_age_hours, cli.json).await,
        Commands::Check => check(config).await,
    }
}

fn build_coordinator(config: CoordinatorConfig) -> Result<Arc<DownloadCoordinator>> {
    let coordinator = DownloadCoordinator::builder(config)
        .notifier(Arc::new(ConsoleNotifier))
        .build()
        .context("failed to set up the download coordinator")?;
    Ok(Arc::new(coordinator))
}

fn print_outcome(json: bool, request_id: &str, url: &str, outcome: &DownloadOutcome) -> Result<()> {
    if json {
        let line = serde_json::json!({
            "request_id": request_id,
            "url": url,
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!("{} {}", url, outcome.summary());
    }
    Ok(())
}

fn print_refusal(json: bool, user_id: i64, url: &str, reason: &AdmissionDenied) -> Result<()> {
    if json {
        let line = serde_json::json!({
            "user_id": user_id,
            "url": url,
            "refused": reason.to_string(),
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!("{} refused: {}", url, reason);
    }
    Ok(())
}

/// Delivered files stay on disk; the reaper removes them once they are stale.
async fn finish(coordinator: &DownloadCoordinator, metrics: bool) -> Result<()> {
    coordinator.shutdown(ShutdownMode::Abandon).await;
    if metrics {
        print!("{}", coordinator.render_metrics()?);
    }
    Ok(())
}

async fn fetch(config: CoordinatorConfig, user_id: i64, raw_url: &str, cli: &Cli) -> Result<()> {
    let url = Url::parse(raw_url).with_context(|| format!("invalid URL {:?}", raw_url))?;
    let coordinator = build_coordinator(config)?;
    let _reaper = spawn_reaper(coordinator.clone(), REAP_INTERVAL);

    let handle = match coordinator.submit(user_id, url).await {
        Ok(handle) => handle,
        Err(denied) => {
            print_refusal(cli.json, user_id, raw_url, &denied)?;
            bail!("request refused: {}", denied);
        }
    };
    let request_id = handle.request_id().to_string();

    let outcome = tokio::select! {
        outcome = handle.outcome() => outcome,
        _ = signal::ctrl_c() => {
            log::warn!("Interrupted, abandoning request {}", request_id);
            bail!("interrupted");
        }
    };

    print_outcome(cli.json, &request_id, raw_url, &outcome)?;
    finish(&coordinator, cli.metrics).await?;

    if !outcome.is_success() {
        bail!("download failed");
    }
    Ok(())
}

async fn report(json: bool, url: &str, handle: DownloadHandle, tally: &mut Tally) -> Result<()> {
    let request_id = handle.request_id().to_string();
    let outcome = handle.outcome().await;
    if outcome.is_success() {
        tally.succeeded += 1;
    } else {
        tally.failed += 1;
    }
    print_outcome(json, &request_id, url, &outcome)
}

async fn batch(config: CoordinatorConfig, cli: &Cli) -> Result<()> {
    let coordinator = build_coordinator(config)?;
    let _reaper = spawn_reaper(coordinator.clone(), REAP_INTERVAL);

    let mut pending: VecDeque<(String, DownloadHandle)> = VecDeque::new();
    let mut tally = Tally::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let (user_id, raw_url) = match parse_batch_line(&line) {
            None => continue,
            Some(Ok(entry)) => entry,
            Some(Err(e)) => {
                log::warn!("Skipping line {}: {}", line_no, e);
                continue;
            }
        };
        let url = match Url::parse(&raw_url) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Skipping line {}: invalid URL {:?}: {}", line_no, raw_url, e);
                continue;
            }
        };

        // A full per-user quota frees up as earlier requests finish
        loop {
            match coordinator.submit(user_id, url.clone()).await {
                Ok(handle) => {
                    pending.push_back((raw_url.clone(), handle));
                    break;
                }
                Err(AdmissionDenied::QuotaExceeded { .. }) if !pending.is_empty() => {
                    if let Some((done_url, handle)) = pending.pop_front() {
                        report(cli.json, &done_url, handle, &mut tally).await?;
                    }
                }
                Err(denied) => {
                    tally.refused += 1;
                    print_refusal(cli.json, user_id, &raw_url, &denied)?;
                    break;
                }
            }
        }
    }

    while let Some((url, handle)) = pending.pop_front() {
        report(cli.json, &url, handle, &mut tally).await?;
    }

    log::info!(
        "Batch finished: {} succeeded, {} failed, {} refused",
        tally.succeeded,
        tally.failed,
        tally.refused
    );
    finish(&coordinator, cli.metrics).await?;

    if tally.failed > 0 || tally.refused > 0 {
        let total = tally.succeeded + tally.failed + tally.refused;
        bail!("{} of {} requests did not succeed", tally.failed + tally.refused, total);
    }
    Ok(())
}

async fn reap(config: CoordinatorConfig, max_age_hours: Option<u64>, json: bool) -> Result<()> {
    let max_age = max_age_hours
        .map(duration_from_hours)
        .unwrap_or(config.stale_file_max_age);
    let coordinator = build_coordinator(config)?;

    let report = coordinator.reap_stale(max_age).await;
    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!(
            "scanned {} files, deleted {}, {} errors",
            report.scanned, report.deleted, report.errors
        );
    }
    Ok(())
}

async fn check(config: CoordinatorConfig) -> Result<()> {
    let gate = ResourceGate::system(config.resources.clone());
    let verdict = tokio::task::spawn_blocking(move || gate.check())
        .await
        .context("resource check panicked")?;
    let ffmpeg = FfmpegInspector::new().is_available().await;

    println!("download folder: {}", config.download_dir.display());
    if verdict.ok {
        println!("resources: ok");
    } else {
        println!("resources: {}", verdict.reason);
    }
    println!("ffmpeg: {}", if ffmpeg { "available" } else { "missing" });

    if !verdict.ok || !ffmpeg {
        bail!("host is not ready to take downloads");
    }
    Ok(())
}
