//! Configuration types for asset-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Download behavior configuration (worker pool, admission rate, publish target)
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Size of the fetch worker pool (default: 8)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Request admission rate in tokens per second (default: 10.0, None = unthrottled)
    #[serde(default = "default_rate_limit")]
    pub rate_limit: Option<f64>,

    /// Name of the published directory used by `download_to_subdir` (default: "downloaded_images")
    #[serde(default = "default_target_subdir")]
    pub target_subdir: String,

    /// Remove a pre-existing target instead of backing it up (default: false)
    #[serde(default)]
    pub delete_existing: bool,

    /// Parent directory for batch staging directories
    ///
    /// When unset, staging happens next to the publish target so the final
    /// rename never crosses a filesystem boundary.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Delay between rate limiter polls when no token is available (default: 50ms)
    #[serde(default = "default_limiter_poll", with = "duration_millis_serde")]
    pub limiter_poll_interval: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            rate_limit: default_rate_limit(),
            target_subdir: default_target_subdir(),
            delete_existing: false,
            staging_dir: None,
            limiter_poll_interval: default_limiter_poll(),
        }
    }
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Budget for establishing a connection (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Budget for the response headers and for each read of the body
    /// (default: 15 seconds)
    #[serde(default = "default_read_timeout", with = "duration_serde")]
    pub read_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Idle connections kept per host (default: same as `max_workers`)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            user_agent: default_user_agent(),
            pool_max_idle_per_host: None,
        }
    }
}

/// Retry configuration for retriable server errors
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 500ms)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// HTTP status codes worth another attempt (default: 500, 502, 503, 504)
    #[serde(default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            retry_statuses: default_retry_statuses(),
        }
    }
}

impl RetryConfig {
    /// Whether a response with this status should be retried
    pub fn is_retry_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }
}

/// Fan-out rename settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenameConfig {
    /// Prefix for the rename copy directory (default: "rename_")
    #[serde(default = "default_rename_prefix")]
    pub rename_prefix: String,

    /// Remove a pre-existing rename copy instead of backing it up (default: false)
    #[serde(default)]
    pub rename_delete_existing: bool,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            rename_prefix: default_rename_prefix(),
            rename_delete_existing: false,
        }
    }
}

/// Main configuration for [`BatchDownloader`](crate::BatchDownloader) and
/// [`Renamer`](crate::Renamer)
///
/// Sub-configs are flattened, so the JSON form is a single flat object
/// (apart from `retry`):
///
/// ```
/// use asset_dl::Config;
///
/// let config = Config::from_json_str(r#"{ "max_workers": 4, "delete_existing": true }"#).unwrap();
/// assert_eq!(config.download.max_workers, 4);
/// assert!(config.download.delete_existing);
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool, rate limit and publish settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// HTTP client settings
    #[serde(flatten)]
    pub http: HttpConfig,

    /// Retry policy for server errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Fan-out rename settings
    #[serde(flatten)]
    pub rename: RenameConfig,
}

impl Config {
    /// Parse a configuration from JSON and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_json_str(&json)
    }

    /// Check the configuration for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_workers == 0 {
            return Err(Error::config("max_workers", "must be at least 1"));
        }

        if let Some(rate) = self.download.rate_limit
            && !(rate.is_finite() && rate > 0.0)
        {
            return Err(Error::config(
                "rate_limit",
                format!("must be a positive number of tokens per second, got {rate}"),
            ));
        }

        validate_dir_name("target_subdir", &self.download.target_subdir)?;
        validate_dir_name("rename_prefix", &format!("{}x", self.rename.rename_prefix))?;

        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts", "must be at least 1"));
        }

        let multiplier = self.retry.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "must be at least 1.0",
            ));
        }

        if self.http.read_timeout.is_zero() {
            return Err(Error::config("read_timeout", "must be non-zero"));
        }

        Ok(())
    }

    /// Idle connection pool size, defaulting to the worker count
    pub fn pool_size(&self) -> usize {
        self.http
            .pool_max_idle_per_host
            .unwrap_or(self.download.max_workers)
    }
}

/// A directory name must be exactly one normal path component
fn validate_dir_name(key: &str, name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(Error::config(
            key,
            format!("'{name}' is not a plain directory name"),
        )),
    }
}

fn default_max_workers() -> usize {
    8
}

fn default_rate_limit() -> Option<f64> {
    Some(10.0)
}

fn default_target_subdir() -> String {
    "downloaded_images".to_string()
}

fn default_limiter_poll() -> Duration {
    Duration::from_millis(50)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_user_agent() -> String {
    concat!("asset-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retry_statuses() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

fn default_rename_prefix() -> String {
    "rename_".to_string()
}

fn default_true() -> bool {
    true
}

// Duration as whole seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration as milliseconds, for the short delays
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.download.max_workers, 8);
        assert_eq!(config.download.rate_limit, Some(10.0));
        assert_eq!(config.download.target_subdir, "downloaded_images");
        assert!(!config.download.delete_existing);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.retry_statuses, vec![500, 502, 503, 504]);
        assert_eq!(config.pool_size(), 8);
    }

    #[test]
    fn empty_json_yields_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config.download.max_workers, 8);
        assert_eq!(config.http.read_timeout, Duration::from_secs(15));
        assert_eq!(config.retry.initial_delay, Duration::from_millis(500));
        assert_eq!(config.rename.rename_prefix, "rename_");
    }

    #[test]
    fn flat_json_fills_nested_sections() {
        let config = Config::from_json_str(
            r#"{
                "max_workers": 10,
                "rate_limit": null,
                "target_subdir": "images",
                "delete_existing": true,
                "connect_timeout": 3,
                "read_timeout": 20,
                "pool_max_idle_per_host": 4,
                "rename_prefix": "named_",
                "retry": { "max_attempts": 5, "initial_delay": 100, "retry_statuses": [503] }
            }"#,
        )
        .unwrap();

        assert_eq!(config.download.max_workers, 10);
        assert_eq!(config.download.rate_limit, None);
        assert_eq!(config.download.target_subdir, "images");
        assert!(config.download.delete_existing);
        assert_eq!(config.http.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.http.read_timeout, Duration::from_secs(20));
        assert_eq!(config.pool_size(), 4);
        assert_eq!(config.rename.rename_prefix, "named_");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(100));
        assert!(config.retry.is_retry_status(503));
        assert!(!config.retry.is_retry_status(500));
    }

    #[test]
    fn serialized_config_parses_back() {
        let mut config = Config::default();
        config.download.max_workers = 3;
        config.retry.jitter = false;

        let json = serde_json::to_string(&config).expect("serialize failed");
        let parsed = Config::from_json_str(&json).expect("parse failed");

        assert_eq!(parsed.download.max_workers, 3);
        assert!(!parsed.retry.jitter);
        assert_eq!(
            parsed.download.limiter_poll_interval,
            Duration::from_millis(50)
        );
    }

    #[test]
    fn rejects_zero_workers() {
        let err = Config::from_json_str(r#"{ "max_workers": 0 }"#).unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("max_workers")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_positive_rate() {
        let mut config = Config::default();
        config.download.rate_limit = Some(0.0);
        assert!(config.validate().is_err());

        config.download.rate_limit = Some(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_target_subdir_with_separators() {
        for bad in ["", "a/b", "..", "/abs"] {
            let mut config = Config::default();
            config.download.target_subdir = bad.to_string();
            match config.validate() {
                Err(Error::Config { key, .. }) => {
                    assert_eq!(key.as_deref(), Some("target_subdir"), "for {bad:?}")
                }
                other => panic!("expected Config error for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_zero_attempts_and_shrinking_backoff() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "target_subdir": "batch" }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.download.target_subdir, "batch");
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::load(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::Config { key: None, .. }));
    }
}
