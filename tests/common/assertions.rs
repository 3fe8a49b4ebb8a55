//! Custom test assertions for integration tests

use asset_dl::Event;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use walkdir::WalkDir;

/// All file paths under `dir`, relative and sorted, using `/` separators
pub fn tree_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(dir)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect();
    files.sort();
    files
}

/// Assert that no hidden staging, scratch or landing entries exist under `dir`
pub fn assert_no_hidden_entries(dir: &Path) {
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy();
        assert!(
            !name.starts_with('.'),
            "unexpected hidden entry left behind: {}",
            entry.path().display()
        );
    }
}

/// Collect events until one matches `done` or the timeout expires
pub async fn collect_events_until<F>(
    events: &mut Receiver<Event>,
    timeout: Duration,
    mut done: F,
) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut collected = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(event) = events.recv().await {
            let finished = done(&event);
            collected.push(event);
            if finished {
                break;
            }
        }
    })
    .await;
    collected
}
