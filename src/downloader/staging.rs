//! Per-batch staging directory and the naming lock guarding its namespace

use crate::error::Result;
use crate::publish::create_staging_dir;
use crate::utils::{get_unique_path, random_token};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Extension of in-flight scratch files
const SCRATCH_EXTENSION: &str = "part";

/// Directory that collects one batch's files until publish
///
/// Dropping the area removes the directory and anything in it, so a batch
/// that errors out before publishing leaves nothing behind. Call
/// [`into_path`](Self::into_path) to take ownership of the directory for
/// publishing.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
    naming_lock: Mutex<()>,
}

impl StagingArea {
    /// Create a fresh hidden staging directory under `parent`
    pub async fn create(parent: &Path) -> Result<Self> {
        Ok(Self {
            dir: create_staging_dir(parent).await?,
            naming_lock: Mutex::new(()),
        })
    }

    /// Path of the staging directory
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh scratch file path for one in-flight download
    ///
    /// Names are random, so workers never need the naming lock to pick one.
    pub fn scratch_path(&self) -> PathBuf {
        self.dir
            .path()
            .join(format!(".{}.{SCRATCH_EXTENSION}", random_token()))
    }

    /// Move a finished scratch file to a collision-free name
    ///
    /// Resolving the name and renaming happen under the naming lock, so two
    /// workers that derived the same name end up with `a.png` and `a_1.png`.
    /// Returns the committed file name.
    pub async fn commit(&self, scratch: &Path, file_name: &str) -> Result<String> {
        let _guard = self.naming_lock.lock().await;

        let final_path = get_unique_path(&self.dir.path().join(file_name)).await?;
        tokio::fs::rename(scratch, &final_path).await?;

        let committed = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        tracing::debug!(scratch = ?scratch, file = %committed, "committed staged file");
        Ok(committed)
    }

    /// Stop managing the directory and return its path
    pub fn into_path(self) -> PathBuf {
        self.dir.keep()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn write_scratch(area: &StagingArea, body: &str) -> PathBuf {
        let scratch = area.scratch_path();
        tokio::fs::write(&scratch, body).await.unwrap();
        scratch
    }

    #[tokio::test]
    async fn scratch_paths_are_hidden_and_distinct() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::create(root.path()).await.unwrap();

        let a = area.scratch_path();
        let b = area.scratch_path();
        assert_ne!(a, b);
        assert_eq!(a.parent().unwrap(), area.path());
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with('.') && name.ends_with(".part"), "got {name}");
    }

    #[tokio::test]
    async fn commit_resolves_collisions() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::create(root.path()).await.unwrap();

        let first = write_scratch(&area, "one").await;
        let second = write_scratch(&area, "two").await;

        assert_eq!(area.commit(&first, "a.png").await.unwrap(), "a.png");
        assert_eq!(area.commit(&second, "a.png").await.unwrap(), "a_1.png");

        assert!(!first.exists() && !second.exists());
        let a = std::fs::read_to_string(area.path().join("a.png")).unwrap();
        let a1 = std::fs::read_to_string(area.path().join("a_1.png")).unwrap();
        assert_eq!(a, "one");
        assert_eq!(a1, "two");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commits_never_overwrite() {
        let root = tempfile::tempdir().unwrap();
        let area = Arc::new(StagingArea::create(root.path()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..20 {
            let area = Arc::clone(&area);
            handles.push(tokio::spawn(async move {
                let scratch = write_scratch(&area, &i.to_string()).await;
                area.commit(&scratch, "same.png").await.unwrap()
            }));
        }

        let mut names = Vec::new();
        for handle in handles {
            names.push(handle.await.unwrap());
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 20, "every commit must get its own name");
        assert_eq!(std::fs::read_dir(area.path()).unwrap().count(), 20);
    }

    #[tokio::test]
    async fn drop_removes_directory_but_into_path_keeps_it() {
        let root = tempfile::tempdir().unwrap();

        let dropped = {
            let area = StagingArea::create(root.path()).await.unwrap();
            area.path().to_path_buf()
        };
        assert!(!dropped.exists());

        let kept = StagingArea::create(root.path()).await.unwrap().into_path();
        assert!(kept.is_dir());
    }
}
