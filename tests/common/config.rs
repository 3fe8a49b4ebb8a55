//! Test configuration helpers for creating test downloaders

use asset_dl::{BatchDownloader, Config};
use std::time::Duration;
use tempfile::TempDir;

/// Config tuned for tests: unthrottled, fast retries, small pool
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.download.rate_limit = None;
    config.download.max_workers = 4;
    config.download.limiter_poll_interval = Duration::from_millis(5);
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config
}

/// Create a downloader plus a temp directory to download into
pub fn create_test_downloader() -> (BatchDownloader, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let downloader = BatchDownloader::new(fast_config()).unwrap();
    (downloader, temp_dir)
}
