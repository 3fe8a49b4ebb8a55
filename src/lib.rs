//! # asset-dl
//!
//! Batch asset downloader with atomic publishing and fan-out renaming.
//!
//! ## Design Philosophy
//!
//! asset-dl is designed to be:
//! - **Safe on disk** - A batch only becomes visible once every download finished,
//!   and existing content is backed up (or explicitly deleted), never overwritten
//! - **Failure tolerant** - One bad URL is a line in the report, not a failed batch
//! - **Polite** - A shared token bucket bounds how fast requests start
//! - **Library-first** - No CLI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use asset_dl::{BatchDownloader, Config, RenameMapping};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = BatchDownloader::new(Config::default())?;
//!
//!     let report = downloader
//!         .download_to_subdir(
//!             ["https://example.com/a.png", "https://example.com/b.png"],
//!             "./assets",
//!         )
//!         .await?;
//!     println!(
//!         "{} downloaded, {} failed: {:?}",
//!         report.success_count(),
//!         report.failure_count(),
//!         report.failed_urls()
//!     );
//!
//!     let mapping = RenameMapping::from_pairs([("a.png", "hero.png"), ("a.png", "thumb.png")]);
//!     let renamed = downloader.apply_rename_mapping(&report.target, &mapping).await?;
//!     println!("rename copy at {:?}", renamed.destination_root);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batch download coordination
pub mod downloader;
/// Error types
pub mod error;
/// Atomic publishing of staged directories
pub mod publish;
/// Token bucket admission control
pub mod rate_limiter;
/// Fan-out renaming
pub mod renamer;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// File naming helpers
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, HttpConfig, RenameConfig, RetryConfig};
pub use downloader::BatchDownloader;
pub use error::{Error, FetchError, PublishError, Result};
pub use rate_limiter::RateLimiter;
pub use renamer::{RenameMapping, Renamer};
pub use types::{
    BatchReport, Event, ExistingTargetPolicy, FailedFetch, FailedRename, RenameReport,
    RenamedFile, StagedFile,
};
