//! Single-URL retrieval into a batch staging directory

use super::staging::StagingArea;
use crate::config::{Config, RetryConfig};
use crate::error::{Error, FetchError, Result};
use crate::rate_limiter::RateLimiter;
use crate::retry::download_with_retry;
use crate::types::{Event, FailedFetch, StagedFile};
use crate::utils::derive_filename;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

/// One URL of a batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadJob {
    /// Position of the URL in the submitted list
    pub index: usize,
    /// URL to fetch
    pub url: String,
}

/// Downloads one URL at a time into a shared [`StagingArea`]
///
/// All workers of a batch share a clone of the same fetcher, so they share
/// the HTTP connection pool, the rate limiter and the staging namespace.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    limiter: RateLimiter,
    staging: Arc<StagingArea>,
    retry: RetryConfig,
    read_timeout: Duration,
    poll_interval: Duration,
    event_tx: broadcast::Sender<Event>,
}

impl Fetcher {
    /// Create a fetcher for one batch
    pub fn new(
        client: reqwest::Client,
        limiter: RateLimiter,
        staging: Arc<StagingArea>,
        config: &Config,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            client,
            limiter,
            staging,
            retry: config.retry.clone(),
            read_timeout: config.http.read_timeout,
            poll_interval: config.download.limiter_poll_interval,
            event_tx,
        }
    }

    /// Download `job.url` and commit it to the staging directory
    ///
    /// Waits for a rate limiter token first. Every failure (bad URL, HTTP
    /// status, network, disk) is turned into a [`FailedFetch`] for this URL;
    /// the scratch file of a failed attempt is removed.
    pub async fn fetch(&self, job: &DownloadJob) -> std::result::Result<StagedFile, FailedFetch> {
        self.limiter.acquire(self.poll_interval).await;

        let scratch = self.staging.scratch_path();
        match self.fetch_to_staging(&job.url, &scratch).await {
            Ok(staged) => {
                tracing::debug!(
                    url = %staged.url,
                    file = %staged.file_name,
                    bytes = staged.bytes,
                    "download completed"
                );
                self.event_tx
                    .send(Event::FetchCompleted {
                        url: staged.url.clone(),
                        file_name: staged.file_name.clone(),
                        bytes: staged.bytes,
                    })
                    .ok();
                Ok(staged)
            }
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&scratch).await
                    && remove.kind() != ErrorKind::NotFound
                {
                    tracing::warn!(scratch = ?scratch, error = %remove, "failed to remove scratch file");
                }

                tracing::warn!(url = %job.url, error = %e, "download failed");
                let failure = FailedFetch {
                    url: job.url.clone(),
                    error: e.to_string(),
                };
                self.event_tx
                    .send(Event::FetchFailed {
                        url: failure.url.clone(),
                        error: failure.error.clone(),
                    })
                    .ok();
                Err(failure)
            }
        }
    }

    async fn fetch_to_staging(&self, url: &str, scratch: &Path) -> Result<StagedFile> {
        url::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = download_with_retry(&self.retry, || self.send(url)).await?;
        let file_name = derive_filename(response.headers(), url);

        let bytes = self.stream_to_file(url, response, scratch).await?;
        let file_name = self.staging.commit(scratch, &file_name).await?;

        Ok(StagedFile {
            url: url.to_string(),
            file_name,
            bytes,
        })
    }

    /// Issue the GET and classify a non-success status
    ///
    /// Waiting for the response headers is bounded by `read_timeout`.
    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        tracing::debug!(url = %url, "requesting");
        let response = tokio::time::timeout(self.read_timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::ResponseTimeout {
                url: url.to_string(),
                timeout: self.read_timeout,
            })??;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                retryable: self.retry.is_retry_status(status.as_u16()),
            }));
        }
        Ok(response)
    }

    /// Stream the body chunk by chunk, bounding every read by `read_timeout`
    async fn stream_to_file(
        &self,
        url: &str,
        mut response: reqwest::Response,
        scratch: &Path,
    ) -> Result<u64> {
        let mut file = tokio::fs::File::create(scratch).await?;
        let mut written = 0u64;

        loop {
            let chunk = tokio::time::timeout(self.read_timeout, response.chunk())
                .await
                .map_err(|_| FetchError::ReadTimeout {
                    url: url.to_string(),
                    timeout: self.read_timeout,
                })??;
            let Some(chunk) = chunk else {
                break;
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        Ok(written)
    }
}
