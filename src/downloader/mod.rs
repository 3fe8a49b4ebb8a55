//! Batch download coordination
//!
//! [`BatchDownloader`] runs one batch at a time through these stages:
//! - [`staging`] - a hidden staging directory next to the target, plus the
//!   naming lock that keeps committed file names unique
//! - [`fetch`] - one worker per URL: rate limiting, retry, streaming, naming
//! - [`crate::publish`] - the completed staging directory is renamed onto the
//!   target path, after the old target was backed up or deleted

pub mod fetch;
pub mod staging;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::error::{Error, FetchError, PublishError, Result};
use crate::publish::publish_dir;
use crate::rate_limiter::RateLimiter;
use crate::renamer::{RenameMapping, Renamer};
use crate::types::{
    BatchReport, Event, ExistingTargetPolicy, FailedFetch, RenameReport, StagedFile,
};
use fetch::{DownloadJob, Fetcher};
use futures::stream::{self, StreamExt};
use staging::StagingArea;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Downloads batches of URLs and publishes each batch as one directory
///
/// Cloning is cheap; clones share the HTTP connection pool, the rate limiter
/// and the event channel. The rate limiter is shared across every batch run
/// through this instance (and its clones), not reset per batch.
#[derive(Clone)]
pub struct BatchDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// HTTP client with connection pool sized for the worker count
    pub(crate) client: reqwest::Client,
    /// Request admission control shared by all workers
    pub(crate) limiter: RateLimiter,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl BatchDownloader {
    /// Create a downloader from a validated configuration
    ///
    /// Builds the HTTP client (connect timeout, user agent, idle pool size),
    /// the shared rate limiter and the event channel.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.http.connect_timeout)
            .pool_max_idle_per_host(config.pool_size())
            .user_agent(config.http.user_agent.as_str())
            .build()?;

        let limiter = RateLimiter::new(config.download.rate_limit);

        let (event_tx, _rx) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            client,
            limiter,
            event_tx,
        })
    }

    /// Subscribe to batch and rename events
    ///
    /// Each call returns an independent receiver. Events sent while nobody
    /// is subscribed are dropped.
    ///
    /// ```no_run
    /// # use asset_dl::{BatchDownloader, Config};
    /// # async fn example() -> asset_dl::Result<()> {
    /// let downloader = BatchDownloader::new(Config::default())?;
    /// let mut events = downloader.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         tracing::info!(?event, "batch event");
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers, dropping it if there are none
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Download `urls` into `save_dir/<target_subdir>`
    pub async fn download_to_subdir<I, S>(
        &self,
        urls: I,
        save_dir: impl AsRef<Path>,
    ) -> Result<BatchReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let target = save_dir.as_ref().join(&self.config.download.target_subdir);
        self.download_batch(urls, target).await
    }

    /// Download `urls` and publish them as the directory `target_path`
    ///
    /// Uses `max_workers` and `delete_existing` from the configuration.
    pub async fn download_batch<I, S>(
        &self,
        urls: I,
        target_path: impl AsRef<Path>,
    ) -> Result<BatchReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.download_batch_with(
            urls,
            target_path,
            self.config.download.max_workers,
            self.config.download.delete_existing,
        )
        .await
    }

    /// Download `urls` with an explicit worker count and existing-target policy
    ///
    /// Every URL is fetched into a fresh staging directory by at most
    /// `concurrency` workers at once. Only after all of them finished is the
    /// staging directory published at `target_path`; a pre-existing target is
    /// removed when `delete_existing` is set and backed up otherwise.
    ///
    /// The HTTP connection pool is sized once, in [`new`](Self::new). A
    /// `concurrency` above that size still works, but workers beyond it open
    /// fresh connections instead of reusing idle ones; a warning is logged.
    ///
    /// Per-URL failures are collected in the returned report and never fail
    /// the call. Errors are returned for problems with the staging directory
    /// or the target path. A batch where nothing succeeded still publishes an
    /// empty directory.
    pub async fn download_batch_with<I, S>(
        &self,
        urls: I,
        target_path: impl AsRef<Path>,
        concurrency: usize,
        delete_existing: bool,
    ) -> Result<BatchReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if concurrency == 0 {
            return Err(Error::config("max_workers", "concurrency must be at least 1"));
        }
        let pool_size = self.config.pool_size();
        if concurrency > pool_size {
            tracing::warn!(
                concurrency,
                pool_size,
                "concurrency exceeds the idle connection pool, extra workers will not reuse connections"
            );
        }
        let target = target_path.as_ref();
        if target.file_name().is_none() {
            return Err(Error::Publish(PublishError::InvalidPath {
                path: target.to_path_buf(),
                reason: "target must name a directory".to_string(),
            }));
        }
        let policy = ExistingTargetPolicy::from_delete_flag(delete_existing);

        let jobs: Vec<DownloadJob> = urls
            .into_iter()
            .enumerate()
            .map(|(index, url)| DownloadJob {
                index,
                url: url.into(),
            })
            .collect();
        let total = jobs.len();

        let staging = Arc::new(StagingArea::create(&self.staging_parent(target)).await?);
        tracing::info!(
            total,
            target = ?target,
            staging = ?staging.path(),
            concurrency,
            "starting batch"
        );
        self.emit_event(Event::BatchStarted {
            total,
            staging: staging.path().to_path_buf(),
        });

        let fetcher = Fetcher::new(
            self.client.clone(),
            self.limiter.clone(),
            Arc::clone(&staging),
            &self.config,
            self.event_tx.clone(),
        );
        let (succeeded, failed) = run_jobs(&fetcher, jobs, concurrency).await;
        drop(fetcher);

        // All workers are done, so this is the last reference
        let staging = Arc::try_unwrap(staging)
            .map_err(|_| Error::Other("staging directory is still in use".to_string()))?;
        let staging_path = staging.into_path();

        let publication = match publish_dir(&staging_path, target, policy).await {
            Ok(publication) => publication,
            Err(e) => {
                tracing::error!(target = ?target, error = %e, "failed to publish batch");
                tokio::fs::remove_dir_all(&staging_path).await.ok();
                return Err(e);
            }
        };

        tracing::info!(
            target = ?publication.target,
            succeeded = succeeded.len(),
            failed = failed.len(),
            "batch published"
        );
        self.emit_event(Event::Published {
            target: publication.target.clone(),
            backup: publication.backup.clone(),
            succeeded: succeeded.len(),
            failed: failed.len(),
        });

        Ok(BatchReport {
            target: publication.target,
            backup: publication.backup,
            succeeded,
            failed,
        })
    }

    /// A [`Renamer`] using this downloader's rename settings and event channel
    pub fn renamer(&self) -> Renamer {
        Renamer::new(self.config.rename.clone()).with_events(self.event_tx.clone())
    }

    /// Fan out files of a published directory per `mapping`
    ///
    /// Uses `rename_delete_existing` from the configuration. See
    /// [`Renamer::apply_rename_mapping`].
    pub async fn apply_rename_mapping(
        &self,
        source_dir: impl AsRef<Path>,
        mapping: &RenameMapping,
    ) -> Result<RenameReport> {
        self.renamer()
            .apply_rename_mapping(
                source_dir,
                mapping,
                self.config.rename.rename_delete_existing,
            )
            .await
    }

    /// Directory that receives the batch staging directory
    fn staging_parent(&self, target: &Path) -> PathBuf {
        if let Some(dir) = &self.config.download.staging_dir {
            return dir.clone();
        }
        match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Run every job through the worker pool and wait for all of them
///
/// Each job runs on its own task so a panicking worker only fails its URL.
/// Results are returned in job order.
async fn run_jobs(
    fetcher: &Fetcher,
    jobs: Vec<DownloadJob>,
    concurrency: usize,
) -> (Vec<StagedFile>, Vec<FailedFetch>) {
    let mut results: Vec<(usize, std::result::Result<StagedFile, FailedFetch>)> =
        stream::iter(jobs)
            .map(|job| {
                let fetcher = fetcher.clone();
                async move {
                    let index = job.index;
                    let url = job.url.clone();
                    let handle = tokio::spawn(async move { fetcher.fetch(&job).await });
                    let result = handle.await.unwrap_or_else(|e| {
                        tracing::error!(url = %url, error = %e, "download task aborted");
                        Err(FailedFetch {
                            error: FetchError::TaskAborted(e.to_string()).to_string(),
                            url,
                        })
                    });
                    (index, result)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

    results.sort_by_key(|(index, _)| *index);

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for (_, result) in results {
        match result {
            Ok(staged) => succeeded.push(staged),
            Err(failure) => failed.push(failure),
        }
    }
    (succeeded, failed)
}
