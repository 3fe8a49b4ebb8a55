//! Core types and events for asset-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What to do when a publish or rename target already exists
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingTargetPolicy {
    /// Move the old content aside to a timestamped backup directory
    #[default]
    Backup,
    /// Remove the old content before installing the new one
    Delete,
}

impl ExistingTargetPolicy {
    /// Map the `delete_existing` flag onto a policy
    pub fn from_delete_flag(delete_existing: bool) -> Self {
        if delete_existing {
            ExistingTargetPolicy::Delete
        } else {
            ExistingTargetPolicy::Backup
        }
    }
}

/// A URL that was downloaded and committed to the staging directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    /// Source URL
    pub url: String,
    /// Final, collision-free file name inside the batch directory
    pub file_name: String,
    /// Number of body bytes written
    pub bytes: u64,
}

/// A URL whose download failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFetch {
    /// Source URL
    pub url: String,
    /// Human-readable failure reason
    pub error: String,
}

/// Outcome of one [`BatchDownloader::download_batch`](crate::BatchDownloader::download_batch) call
///
/// Both lists keep the order in which the URLs were submitted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Directory the batch was published to
    pub target: PathBuf,
    /// Where the previous content of `target` was moved, if it existed and was backed up
    pub backup: Option<PathBuf>,
    /// Successfully downloaded files
    pub succeeded: Vec<StagedFile>,
    /// URLs that could not be downloaded
    pub failed: Vec<FailedFetch>,
}

impl BatchReport {
    /// Number of files published
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    /// Number of URLs that failed
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    /// URLs that failed, in submission order
    pub fn failed_urls(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.url.as_str()).collect()
    }

    /// True when every URL was downloaded
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A source file that was fanned out to one or more names
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamedFile {
    /// Original path, relative to the copied tree
    pub source: PathBuf,
    /// Created paths, relative to the copied tree, in mapping order
    pub destinations: Vec<PathBuf>,
}

/// A mapped source file that could not be fanned out; it is kept under its original name
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRename {
    /// Original path, relative to the copied tree
    pub source: PathBuf,
    /// Human-readable failure reason
    pub error: String,
}

/// Outcome of a fan-out rename run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RenameReport {
    /// The published rename copy
    pub destination_root: PathBuf,
    /// Where a previous rename copy was moved, if one existed and was backed up
    pub backup: Option<PathBuf>,
    /// Files duplicated under their new names
    pub renamed: Vec<RenamedFile>,
    /// Mapped files left in place because a copy could not be made
    pub failed: Vec<FailedRename>,
    /// Files without a mapping entry, copied unchanged
    pub untouched: usize,
}

impl RenameReport {
    /// Total number of destination files created
    pub fn created_count(&self) -> usize {
        self.renamed.iter().map(|r| r.destinations.len()).sum()
    }

    /// True when every mapped file was fanned out
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Events emitted while batches run
///
/// Subscribe with [`BatchDownloader::subscribe`](crate::BatchDownloader::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A batch started downloading into its staging directory
    BatchStarted {
        /// Number of URLs in the batch
        total: usize,
        /// Staging directory for this batch
        staging: PathBuf,
    },

    /// A file was committed to the staging directory
    FetchCompleted {
        /// Source URL
        url: String,
        /// Committed file name
        file_name: String,
        /// Bytes written
        bytes: u64,
    },

    /// A URL failed and was left out of the batch
    FetchFailed {
        /// Source URL
        url: String,
        /// Failure reason
        error: String,
    },

    /// A staged directory became visible at its target path
    Published {
        /// Published directory
        target: PathBuf,
        /// Backup of the previous content, if one was made
        backup: Option<PathBuf>,
        /// Files published
        succeeded: usize,
        /// URLs that failed
        failed: usize,
    },

    /// A fan-out rename copy was published
    Renamed {
        /// The rename copy
        destination_root: PathBuf,
        /// Source files fanned out
        renamed: usize,
        /// Mapped files that could not be fanned out
        failed: usize,
    },
}
