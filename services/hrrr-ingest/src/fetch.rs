//! Cached downloads of HRRR GRIB2 files.
//!
//! Files land in the cache directory under a name derived from their
//! locator, so a second run over the same hours reuses them. Bytes are
//! streamed to a `.partial` file and renamed into place only when the
//! body is complete.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Downloader settings.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub cache_dir: PathBuf,
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry)
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

impl FetchConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_retries: 3,
            initial_retry_delay: Duration::from_secs(2),
            max_retry_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Rewrite an `s3://bucket/key` locator to its public HTTPS endpoint.
///
/// HTTP(S) locators pass through. A bucket that already names its
/// endpoint host is used as the host directly.
pub fn to_http_url(locator: &str) -> String {
    let Some(rest) = locator.strip_prefix("s3://") else {
        return locator.to_string();
    };
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.contains(".amazonaws.com") {
        format!("https://{}/{}", bucket, key)
    } else {
        format!("https://{}.s3.amazonaws.com/{}", bucket, key)
    }
}

/// Cache file name of a locator: the HTTPS host and path joined with `_`.
pub fn cache_file_name(locator: &str) -> String {
    let url = to_http_url(locator);
    let trimmed = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(&url);
    trimmed.trim_matches('/').replace('/', "_")
}

/// Downloads locators into the cache directory.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// Local path a locator is cached at.
    pub fn cache_path(&self, locator: &str) -> PathBuf {
        self.config.cache_dir.join(cache_file_name(locator))
    }

    /// Return the cached file for `locator`, downloading it first if needed.
    #[instrument(skip(self, cancel), fields(locator = %locator))]
    pub async fn fetch(&self, locator: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        let final_path = self.cache_path(locator);
        if fs::try_exists(&final_path).await.unwrap_or(false) {
            info!(path = %final_path.display(), "File already cached, skipping download");
            return Ok(final_path);
        }

        fs::create_dir_all(&self.config.cache_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create cache directory {}",
                    self.config.cache_dir.display()
                )
            })?;

        let url = to_http_url(locator);
        let temp_path = final_path.with_extension("grib2.partial");
        let mut retry_count = 0;
        let mut delay = self.config.initial_retry_delay;

        info!(url = %url, path = %final_path.display(), "Starting download");

        loop {
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(anyhow!("Download of {} cancelled", url)),
                result = self.download_once(&url, &temp_path) => result,
            };

            match attempt {
                Ok(bytes) => {
                    if fs::rename(&temp_path, &final_path).await.is_err() {
                        fs::copy(&temp_path, &final_path).await?;
                        fs::remove_file(&temp_path).await?;
                    }
                    info!(path = %final_path.display(), bytes, "Download completed");
                    return Ok(final_path);
                }
                Err(e) => {
                    fs::remove_file(&temp_path).await.ok();
                    retry_count += 1;

                    if cancel.is_cancelled() || is_permanent(&e) || retry_count > self.config.max_retries
                    {
                        return Err(e.context(format!(
                            "Failed to download {} after {} attempt(s)",
                            url, retry_count
                        )));
                    }

                    warn!(
                        error = %e,
                        retry = retry_count,
                        max_retries = self.config.max_retries,
                        delay_secs = delay.as_secs(),
                        "Download failed, retrying"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = std::cmp::min(delay * 2, self.config.max_retry_delay);
                }
            }
        }
    }

    /// One GET streamed into `temp_path`. Returns the bytes written.
    async fn download_once(&self, url: &str, temp_path: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpStatus(status).into());
        }
        let expected = response.content_length();

        let mut file = File::create(temp_path)
            .await
            .context("Failed to open output file")?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading response chunk")?;
            file.write_all(&chunk)
                .await
                .context("Error writing to file")?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        if let Some(expected) = expected {
            if written != expected {
                return Err(anyhow!(
                    "Download size mismatch: expected {} bytes, got {}",
                    expected,
                    written
                ));
            }
        }
        debug!(bytes = written, "Body received");
        Ok(written)
    }
}

/// Non-success HTTP status.
#[derive(Debug)]
struct HttpStatus(StatusCode);

impl std::fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP error: {}", self.0)
    }
}

impl std::error::Error for HttpStatus {}

/// Client errors other than throttling will not change on retry.
fn is_permanent(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<HttpStatus>()
        .map(|HttpStatus(status)| {
            status.is_client_error() && *status != StatusCode::TOO_MANY_REQUESTS
        })
        .unwrap_or(false)
}
