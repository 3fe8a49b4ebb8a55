//! Publishing staged directories at their final path
//!
//! A batch is assembled in a staging directory and only becomes visible at its
//! target path through a single directory rename. A pre-existing target is
//! first removed or moved aside according to [`ExistingTargetPolicy`], so the
//! target path goes straight from "absent" to "fully populated".
//!
//! `rename(2)` is only atomic within one filesystem. When staging and target
//! live on different volumes, the tree is copied into a hidden landing
//! directory next to the target and that landing directory is renamed into
//! place, which keeps the final step atomic at the cost of a full copy.

use crate::error::{Error, PublishError, Result};
use crate::types::ExistingTargetPolicy;
use crate::utils::{get_unique_path, random_token};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, info, warn};

/// Prefix of hidden staging directories
const STAGING_PREFIX: &str = ".asset-dl-staging-";

/// Result of a publish step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    /// Path the content is now visible at
    pub target: PathBuf,
    /// Where the previous content went, if it was backed up
    pub backup: Option<PathBuf>,
}

/// Create a hidden, self-deleting staging directory under `parent`
///
/// `parent` is created if missing. The directory is removed when the returned
/// guard drops unless it was published first.
pub async fn create_staging_dir(parent: &Path) -> Result<TempDir> {
    fs::create_dir_all(parent).await?;
    let parent = parent.to_path_buf();
    let dir = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
    })
    .await
    .map_err(|e| Error::Other(format!("staging directory task failed: {e}")))??;
    debug!(staging = ?dir.path(), "created staging directory");
    Ok(dir)
}

/// Make `staging` visible at `target`
///
/// Applies `policy` when `target` already exists, then moves the staging
/// directory into place. If the move fails after a backup was taken, the
/// backup is moved back.
pub async fn publish_dir(
    staging: &Path,
    target: &Path,
    policy: ExistingTargetPolicy,
) -> Result<Publication> {
    if !fs::metadata(staging).await.is_ok_and(|m| m.is_dir()) {
        return Err(PublishError::SourceMissing {
            path: staging.to_path_buf(),
        }
        .into());
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let backup = clear_target(target, policy).await?;

    if let Err(e) = move_dir(staging, target).await {
        if let Some(backup) = &backup {
            match fs::rename(backup, target).await {
                Ok(()) => warn!(?target, "publish failed, previous content restored"),
                Err(restore) => warn!(
                    ?target,
                    ?backup,
                    error = %restore,
                    "publish failed and the backup could not be restored"
                ),
            }
        }
        return Err(e);
    }

    info!(?target, ?backup, "published directory");
    Ok(Publication {
        target: target.to_path_buf(),
        backup,
    })
}

/// Remove or back up whatever exists at `target`
///
/// Returns the backup path when the content was moved aside, None when the
/// target did not exist or was deleted.
pub async fn clear_target(target: &Path, policy: ExistingTargetPolicy) -> Result<Option<PathBuf>> {
    let metadata = match fs::symlink_metadata(target).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match policy {
        ExistingTargetPolicy::Delete => {
            if metadata.is_dir() {
                fs::remove_dir_all(target).await?;
            } else {
                fs::remove_file(target).await?;
            }
            info!(?target, "deleted existing target");
            Ok(None)
        }
        ExistingTargetPolicy::Backup => {
            let backup = backup_path(target).await?;
            fs::rename(target, &backup).await.map_err(|e| {
                Error::Publish(PublishError::BackupFailed {
                    target: target.to_path_buf(),
                    backup: backup.clone(),
                    reason: e.to_string(),
                })
            })?;
            info!(?target, ?backup, "backed up existing target");
            Ok(Some(backup))
        }
    }
}

/// Free `<name>_backup_<YYYYmmdd_HHMMSS>` path next to `target`
pub async fn backup_path(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            Error::Publish(PublishError::InvalidPath {
                path: target.to_path_buf(),
                reason: "target has no usable file name".to_string(),
            })
        })?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let candidate = target.with_file_name(format!("{name}_backup_{timestamp}"));
    get_unique_path(&candidate).await
}

/// Move a directory, falling back to copy-then-delete across filesystems
///
/// `dst` must not exist (or be an empty directory).
pub async fn move_dir(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            warn!(
                ?src,
                ?dst,
                "staging and target are on different filesystems, copying"
            );
            move_across_devices(src, dst).await
        }
        Err(e) => Err(Error::Publish(PublishError::MoveFailed {
            source_path: src.to_path_buf(),
            dest_path: dst.to_path_buf(),
            reason: e.to_string(),
        })),
    }
}

async fn move_across_devices(src: &Path, dst: &Path) -> Result<()> {
    let name = dst
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("target");
    let landing = dst.with_file_name(format!(".{name}.landing-{}", random_token()));

    if let Err(e) = copy_dir_all(src, &landing).await {
        fs::remove_dir_all(&landing).await.ok();
        return Err(e);
    }

    if let Err(e) = fs::rename(&landing, dst).await {
        fs::remove_dir_all(&landing).await.ok();
        return Err(Error::Publish(PublishError::MoveFailed {
            source_path: src.to_path_buf(),
            dest_path: dst.to_path_buf(),
            reason: e.to_string(),
        }));
    }

    if let Err(e) = fs::remove_dir_all(src).await {
        warn!(?src, error = %e, "published copy, but could not remove the source tree");
    }
    Ok(())
}

/// Recursively copy `src` into `dst`, creating `dst` if needed
///
/// Symlinks are followed; file contents are copied byte for byte.
pub fn copy_dir_all<'a>(
    src: &'a Path,
    dst: &'a Path,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        fs::create_dir_all(dst).await?;

        let mut entries = fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let from = entry.path();
            let to = dst.join(entry.file_name());

            if fs::metadata(&from).await?.is_dir() {
                copy_dir_all(&from, &to).await?;
            } else {
                fs::copy(&from, &to).await?;
            }
        }
        Ok(())
    })
}
