//! HttpBackend: direct file URLs streamed to disk with reqwest.
//!
//! A HEAD request probes the announced size first so oversized files are
//! refused before any bytes are written; unknown sizes proceed and are
//! checked again while streaming.

use crate::core::error::AppResult;
use crate::download::error::{FetchError, FetchErrorKind};
use crate::download::source::{FetchBackend, StagingFiles};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use url::Url;

/// Fetch backend for direct HTTP file downloads.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    max_download_bytes: u64,
}

impl HttpBackend {
    /// Builds the HTTP client. `proxy` accepts any scheme reqwest understands
    /// (`http://`, `socks5://`).
    pub fn new(max_download_bytes: u64, proxy: Option<&str>) -> AppResult<Self> {
        let mut builder = Client::builder()
            .user_agent(concat!("reelgrab/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30));
        builder = match proxy {
            Some(proxy) => builder.proxy(reqwest::Proxy::all(proxy)?),
            None => builder.no_proxy(),
        };

        Ok(Self {
            client: builder.build()?,
            max_download_bytes,
        })
    }

    /// Size announced by a HEAD request, if the server gives one.
    async fn probe_size(&self, url: &Url, timeout: Duration) -> Option<u64> {
        let response = match self.client.head(url.as_str()).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                log::debug!("HEAD {} returned {}, size unknown", url, response.status());
                return None;
            }
            Err(e) => {
                log::debug!("HEAD {} failed, size unknown: {}", url, e);
                return None;
            }
        };
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
    }

    fn too_large(&self, size: u64) -> FetchError {
        FetchError::new(
            FetchErrorKind::TooLarge,
            format!(
                "file is {:.1} MB, limit is {:.1} MB",
                size as f64 / (1024.0 * 1024.0),
                self.max_download_bytes as f64 / (1024.0 * 1024.0)
            ),
        )
    }
}

/// Maps an unsuccessful HTTP status to a fetch error kind.
pub fn kind_for_status(status: StatusCode) -> FetchErrorKind {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchErrorKind::NotFound,
        StatusCode::TOO_MANY_REQUESTS => FetchErrorKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FetchErrorKind::Timeout,
        _ => FetchErrorKind::Unknown,
    }
}

fn map_request_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::timeout(format!("HTTP request timed out: {}", err))
    } else {
        FetchError::unknown(format!("HTTP request failed: {}", err))
    }
}

/// `<unix_ts>_<random>`; the random part keeps same-second downloads apart.
fn generated_stem() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", ts, &token[..8])
}

#[async_trait]
impl FetchBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, url: &Url, dest_dir: &Path, timeout: Duration) -> Result<PathBuf, FetchError> {
        if let Some(size) = self.probe_size(url, timeout).await {
            if size > self.max_download_bytes {
                log::warn!("Refusing {}: announced {} bytes", url, size);
                return Err(self.too_large(size));
            }
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let stem = generated_stem();
        let path = dest_dir.join(format!("{}.mp4", stem));
        let mut staging = StagingFiles::new(dest_dir, &stem);

        log::info!("HTTP direct download: {} -> {}", url, path.display());

        let response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(kind_for_status(status), format!("HTTP {} for {}", status, url)));
        }

        let mut file = tokio::fs::File::create(&path).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_request_error)?;
            downloaded += chunk.len() as u64;
            if downloaded > self.max_download_bytes {
                return Err(self.too_large(downloaded));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if downloaded == 0 {
            return Err(FetchError::unknown(format!("empty response body from {}", url)));
        }

        log::info!(
            "HTTP download complete: {} ({:.2} MB)",
            path.display(),
            downloaded as f64 / (1024.0 * 1024.0)
        );

        staging.keep();
        Ok(path)
    }
}
