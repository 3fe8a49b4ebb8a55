//! Shared test helpers for creating BatchDownloader instances in tests.

use crate::config::Config;
use crate::downloader::BatchDownloader;
use crate::downloader::fetch::Fetcher;
use crate::downloader::staging::StagingArea;
use crate::rate_limiter::RateLimiter;
use crate::types::Event;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config with an unthrottled limiter and millisecond retry delays
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.download.rate_limit = None;
    config.download.max_workers = 4;
    config.download.limiter_poll_interval = Duration::from_millis(5);
    config.http.connect_timeout = Duration::from_secs(2);
    config.http.read_timeout = Duration::from_secs(5);
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config
}

/// Helper to create a test BatchDownloader instance with a scratch directory.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) fn create_test_downloader() -> (BatchDownloader, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let downloader = BatchDownloader::new(test_config()).unwrap();
    (downloader, temp_dir)
}

/// A fetcher over a fresh staging area, plus an event receiver for it
pub(crate) fn create_test_fetcher(
    config: &Config,
    staging: Arc<StagingArea>,
) -> (Fetcher, tokio::sync::broadcast::Receiver<Event>) {
    let (event_tx, event_rx) = tokio::sync::broadcast::channel(100);
    let fetcher = Fetcher::new(
        reqwest::Client::new(),
        RateLimiter::new(config.download.rate_limit),
        staging,
        config,
        event_tx,
    );
    (fetcher, event_rx)
}

/// Serve `body` at `route` with the given content type
pub(crate) async fn mount_file(server: &MockServer, route: &str, body: &[u8], content_type: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", content_type)
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
}

/// Serve a bare status code at `route`
pub(crate) async fn mount_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Sorted names of the entries directly inside `dir`
pub(crate) fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
