//! Fan-out renaming of a published directory
//!
//! A [`RenameMapping`] assigns one or more new names to a source file name.
//! [`Renamer::apply_rename_mapping`] copies the whole source tree, duplicates
//! every mapped file under each of its new names inside the copy, and only
//! then removes the original. The source tree itself is never modified.
//!
//! The copy is assembled in a hidden staging directory and published as
//! `<rename_prefix><name>` next to the source, with the same backup-or-delete
//! handling of a previous copy as batch downloads use.

use crate::config::RenameConfig;
use crate::error::{Error, PublishError, Result};
use crate::publish::{copy_dir_all, create_staging_dir, publish_dir};
use crate::types::{Event, ExistingTargetPolicy, FailedRename, RenameReport, RenamedFile};
use crate::utils::{random_token, sanitize_file_name};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::broadcast;

/// Source file name to ordered destination names
///
/// Serializes as a plain JSON object: `{"x.png": ["1.png", "2.png"]}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenameMapping {
    entries: HashMap<String, Vec<String>>,
}

impl RenameMapping {
    /// An empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `destination` to the names of `source`
    ///
    /// Destinations keep insertion order; adding the same one twice is a no-op.
    pub fn insert(&mut self, source: impl Into<String>, destination: impl Into<String>) {
        let destination = destination.into();
        let destinations = self.entries.entry(source.into()).or_default();
        if !destinations.contains(&destination) {
            destinations.push(destination);
        }
    }

    /// Build a mapping from `(source, destination)` records
    ///
    /// ```
    /// use asset_dl::RenameMapping;
    ///
    /// let mapping = RenameMapping::from_pairs([
    ///     ("x.png", "1.png"),
    ///     ("x.png", "2.png"),
    ///     ("y.png", "3.png"),
    /// ]);
    /// assert_eq!(mapping.len(), 2);
    /// assert_eq!(mapping.get("x.png"), Some(&["1.png".to_string(), "2.png".to_string()][..]));
    /// ```
    pub fn from_pairs<I, S, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<String>,
        D: Into<String>,
    {
        let mut mapping = Self::new();
        for (source, destination) in pairs {
            mapping.insert(source, destination);
        }
        mapping
    }

    /// Destination names for `source`
    pub fn get(&self, source: &str) -> Option<&[String]> {
        self.entries.get(source).map(Vec::as_slice)
    }

    /// Whether `source` has an entry
    pub fn contains(&self, source: &str) -> bool {
        self.entries.contains_key(source)
    }

    /// Number of source names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Applies rename mappings to published directories
#[derive(Clone, Debug)]
pub struct Renamer {
    config: RenameConfig,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl Renamer {
    /// Create a renamer with the given settings
    pub fn new(config: RenameConfig) -> Self {
        Self {
            config,
            event_tx: None,
        }
    }

    /// Report [`Event::Renamed`] on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Directory the rename copy of `source_dir` is published to
    ///
    /// A sibling of `source_dir` named `<rename_prefix><name>`.
    pub fn destination_root(&self, source_dir: &Path) -> Result<PathBuf> {
        let name = source_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::Publish(PublishError::InvalidPath {
                    path: source_dir.to_path_buf(),
                    reason: "source directory has no usable name".to_string(),
                })
            })?;
        if self.config.rename_prefix.is_empty() {
            return Err(Error::config(
                "rename_prefix",
                "rename_prefix must not be empty",
            ));
        }
        Ok(source_dir.with_file_name(format!("{}{name}", self.config.rename_prefix)))
    }

    /// Copy `source_dir` and fan out its mapped files inside the copy
    ///
    /// Every file in the copied tree whose name is a key of `mapping` is
    /// duplicated under each destination name in the same directory, then
    /// removed. Files without an entry are kept as they are. Mapped files may
    /// take each other's names, so chained and swapped mappings work.
    ///
    /// A file fails, keeping its original name, when a destination name is
    /// invalid, is claimed by another mapped file too, or belongs to a file
    /// that stays (an unmapped file or one that failed itself). Copies made
    /// for a failed file are removed again, and failures are recorded in the
    /// report. Existing files are never overwritten.
    ///
    /// A previous rename copy is deleted when `delete_existing` is set and
    /// backed up otherwise. A missing `source_dir` is an error.
    pub async fn apply_rename_mapping(
        &self,
        source_dir: impl AsRef<Path>,
        mapping: &RenameMapping,
        delete_existing: bool,
    ) -> Result<RenameReport> {
        let source_dir = source_dir.as_ref();
        if !fs::metadata(source_dir).await.is_ok_and(|m| m.is_dir()) {
            return Err(PublishError::SourceMissing {
                path: source_dir.to_path_buf(),
            }
            .into());
        }

        let destination_root = self.destination_root(source_dir)?;
        let parent = destination_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let staging = create_staging_dir(&parent).await?;
        copy_dir_all(source_dir, staging.path()).await?;
        tracing::debug!(source = ?source_dir, staging = ?staging.path(), "copied tree for renaming");

        let mut report = fan_out_tree(staging.path(), mapping).await?;

        let policy = ExistingTargetPolicy::from_delete_flag(delete_existing);
        let staging_path = staging.keep();
        let publication = match publish_dir(&staging_path, &destination_root, policy).await {
            Ok(publication) => publication,
            Err(e) => {
                fs::remove_dir_all(&staging_path).await.ok();
                return Err(e);
            }
        };
        report.destination_root = publication.target;
        report.backup = publication.backup;

        tracing::info!(
            destination = ?report.destination_root,
            renamed = report.renamed.len(),
            created = report.created_count(),
            failed = report.failed.len(),
            untouched = report.untouched,
            "rename copy published"
        );
        if let Some(event_tx) = &self.event_tx {
            event_tx
                .send(Event::Renamed {
                    destination_root: report.destination_root.clone(),
                    renamed: report.renamed.len(),
                    failed: report.failed.len(),
                })
                .ok();
        }

        Ok(report)
    }
}

/// Extension of hidden copies waiting for their final name
const PENDING_EXTENSION: &str = "rename";

/// One mapped file and the names it ends up under
struct FanOut {
    /// Source path relative to the tree root
    source: PathBuf,
    /// Destination paths relative to the tree root, in mapping order
    destinations: Vec<PathBuf>,
    /// One of the destinations is the source's own name
    keeps_source: bool,
    /// Hidden copies and the destination each one becomes
    pending: Vec<(PathBuf, PathBuf)>,
}

impl FanOut {
    /// Destinations that need a new file
    fn new_names(&self) -> impl Iterator<Item = &PathBuf> {
        self.destinations.iter().filter(move |d| **d != self.source)
    }
}

/// Apply `mapping` to every file under `root`
///
/// The file list is taken before any copy is made, so new files are never
/// matched against the mapping themselves. All mapped files are planned
/// together: a file may take the name of another mapped file that goes away,
/// so chains (`a -> b`, `b -> c`) and swaps give the same result whatever
/// order the files are listed in.
///
/// Copies are written to hidden names first. Originals are removed only once
/// every copy exists, and the hidden copies are renamed last.
async fn fan_out_tree(root: &Path, mapping: &RenameMapping) -> Result<RenameReport> {
    let (files, dirs) = list_entries(root).await?;
    let occupied: HashSet<PathBuf> = files.iter().chain(&dirs).cloned().collect();

    let mut report = RenameReport::default();
    let mut plans = Vec::new();
    for relative in files {
        let name = relative
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let Some(destinations) = mapping.get(name) else {
            report.untouched += 1;
            continue;
        };
        match plan_fan_out(&relative, destinations) {
            Ok(plan) => plans.push(plan),
            Err(reason) => reject(&mut report, relative, reason),
        }
    }

    for (plan, reason) in reject_conflicts(&mut plans, &occupied) {
        reject(&mut report, plan.source, reason);
    }

    let mut copied = Vec::with_capacity(plans.len());
    for mut plan in plans {
        match copy_to_pending(root, &mut plan).await {
            Ok(()) => copied.push(plan),
            Err(reason) => {
                discard_pending(&plan).await;
                reject(&mut report, plan.source, reason);
            }
        }
    }
    let mut plans = copied;

    // A failed copy keeps its original, which may block another destination
    for (plan, reason) in reject_conflicts(&mut plans, &occupied) {
        discard_pending(&plan).await;
        reject(&mut report, plan.source, reason);
    }

    for plan in plans.iter().filter(|p| !p.keeps_source) {
        fs::remove_file(root.join(&plan.source)).await?;
    }
    for plan in plans {
        for (pending, destination) in &plan.pending {
            fs::rename(pending, root.join(destination)).await?;
        }
        tracing::debug!(source = ?plan.source, destinations = ?plan.destinations, "fanned out file");
        report.renamed.push(RenamedFile {
            source: plan.source,
            destinations: plan.destinations,
        });
    }

    report.failed.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(report)
}

fn reject(report: &mut RenameReport, source: PathBuf, reason: String) {
    tracing::warn!(source = ?source, error = %reason, "rename failed, original kept");
    report.failed.push(FailedRename {
        source,
        error: reason,
    });
}

/// Validate the destination names of one mapped file
fn plan_fan_out(relative: &Path, destinations: &[String]) -> std::result::Result<FanOut, String> {
    if destinations.is_empty() {
        return Err("mapping has no destination names".to_string());
    }

    let source_name = relative.file_name().and_then(|n| n.to_str());
    let relative_dir = relative.parent().unwrap_or_else(|| Path::new(""));

    let mut plan = FanOut {
        source: relative.to_path_buf(),
        destinations: Vec::with_capacity(destinations.len()),
        keeps_source: false,
        pending: Vec::new(),
    };
    for destination in destinations {
        if sanitize_file_name(destination).as_deref() != Some(destination.as_str()) {
            return Err(format!("invalid destination name {destination:?}"));
        }
        if source_name == Some(destination.as_str()) {
            plan.keeps_source = true;
        }
        plan.destinations.push(relative_dir.join(destination));
    }
    Ok(plan)
}

/// Drop plans whose destinations cannot be taken, until the rest agree
///
/// A destination is blocked when two plans claim it, or when an entry of
/// that name exists and is not a mapped file that goes away. Dropping a plan
/// keeps its original in place, which can block further plans.
fn reject_conflicts(
    plans: &mut Vec<FanOut>,
    occupied: &HashSet<PathBuf>,
) -> Vec<(FanOut, String)> {
    let mut rejected = Vec::new();
    loop {
        let blocked: Vec<(usize, String)> = {
            let vacated: HashSet<&Path> = plans
                .iter()
                .filter(|p| !p.keeps_source)
                .map(|p| p.source.as_path())
                .collect();
            let mut claims: HashMap<&Path, usize> = HashMap::new();
            for destination in plans.iter().flat_map(|plan| plan.new_names()) {
                *claims.entry(destination.as_path()).or_default() += 1;
            }

            plans
                .iter()
                .enumerate()
                .filter_map(|(index, plan)| {
                    plan.new_names()
                        .find_map(|destination| {
                            if claims.get(destination.as_path()).copied().unwrap_or(0) > 1 {
                                Some(format!(
                                    "destination {} is claimed by more than one file",
                                    destination.display()
                                ))
                            } else if occupied.contains(destination)
                                && !vacated.contains(destination.as_path())
                            {
                                Some(format!("destination {} already exists", destination.display()))
                            } else {
                                None
                            }
                        })
                        .map(|reason| (index, reason))
                })
                .collect()
        };

        if blocked.is_empty() {
            return rejected;
        }
        for (index, reason) in blocked.into_iter().rev() {
            rejected.push((plans.remove(index), reason));
        }
    }
}

/// Copy the source of `plan` to one hidden file per new destination
async fn copy_to_pending(root: &Path, plan: &mut FanOut) -> std::result::Result<(), String> {
    let source = root.join(&plan.source);
    let new_names: Vec<PathBuf> = plan.new_names().cloned().collect();

    for destination in new_names {
        let pending = source.with_file_name(format!(".{}.{PENDING_EXTENSION}", random_token()));
        if let Err(e) = fs::copy(&source, &pending).await {
            fs::remove_file(&pending).await.ok();
            return Err(format!("failed to copy to {}: {e}", destination.display()));
        }
        plan.pending.push((pending, destination));
    }
    Ok(())
}

async fn discard_pending(plan: &FanOut) {
    for (pending, _) in &plan.pending {
        fs::remove_file(pending).await.ok();
    }
}

/// Relative paths of all files under `root` (sorted) and of all directories
async fn list_entries(root: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative_dir) = pending.pop() {
        let mut entries = fs::read_dir(root.join(&relative_dir)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let relative = relative_dir.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                dirs.push(relative.clone());
                pending.push(relative);
            } else {
                files.push(relative);
            }
        }
    }

    files.sort();
    Ok((files, dirs))
}
