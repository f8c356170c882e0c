//! Inbox watcher.
//!
//! Polls a drop directory, waits for each file's size to hold steady across
//! two consecutive scans, then moves it into the accepted directory under a
//! content-addressed name and enqueues it. Moving before enqueueing means a
//! crash can leave an accepted file unqueued, which the startup sweep
//! re-enqueues, but never a queued item whose file is still being written.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::{NewItem, Priority};
use crate::repository::{QueueRepository, RepositoryError};

const HIGH_PRIORITY_MARKERS: &[&str] = &["urgent", "exam", "quiz"];
const LOW_PRIORITY_MARKERS: &[&str] = &["practice", "exercise", "homework"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub inbox_dir: PathBuf,
    pub accepted_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub extensions: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            inbox_dir: PathBuf::from("inbox"),
            accepted_dir: PathBuf::from("accepted"),
            poll_interval_secs: 2,
            extensions: vec!["pdf".into(), "txt".into(), "md".into()],
        }
    }
}

pub struct Watcher {
    config: WatcherConfig,
    queue: QueueRepository,
    /// Size seen at the previous scan, keyed by inbox path.
    last_sizes: HashMap<PathBuf, u64>,
    /// Paths that failed to move or enqueue; skipped until they change size.
    failed: HashSet<PathBuf>,
}

impl Watcher {
    pub fn new(config: WatcherConfig, queue: QueueRepository) -> std::io::Result<Self> {
        std::fs::create_dir_all(&config.inbox_dir)?;
        std::fs::create_dir_all(&config.accepted_dir)?;
        Ok(Self {
            config,
            queue,
            last_sizes: HashMap::new(),
            failed: HashSet::new(),
        })
    }

    /// Poll the inbox until cancelled.
    pub async fn run(mut self, cancellation_token: CancellationToken) {
        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        info!(inbox = %self.config.inbox_dir.display(), "watcher started");

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    debug!("watcher shutting down");
                    break;
                }
                _ = tokio::time::sleep(poll_interval) => {
                    if let Err(e) = self.scan_once() {
                        error!("inbox scan failed: {}", e);
                    }
                }
            }
        }
    }

    /// One pass over the inbox. Public so tests and the startup sweep can
    /// drive scans without the timer.
    pub fn scan_once(&mut self) -> std::io::Result<()> {
        let mut seen = HashSet::new();

        for entry in std::fs::read_dir(&self.config.inbox_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() || !self.accepts_extension(&path) {
                continue;
            }

            let size = entry.metadata()?.len();
            seen.insert(path.clone());

            if self.failed.contains(&path) {
                // Leave alone until the file changes; a rewrite clears it.
                if self.last_sizes.get(&path) != Some(&size) {
                    self.failed.remove(&path);
                } else {
                    continue;
                }
            }

            let stable = size > 0 && self.last_sizes.get(&path) == Some(&size);
            self.last_sizes.insert(path.clone(), size);

            if stable {
                if let Err(e) = self.accept_file(&path) {
                    error!(path = %path.display(), "failed to accept file: {}", e);
                    self.failed.insert(path);
                }
            }
        }

        // Files that vanished between scans drop out of the tracking maps.
        self.last_sizes.retain(|path, _| seen.contains(path));
        self.failed.retain(|path| seen.contains(path));

        Ok(())
    }

    fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.config.extensions.iter().any(|allowed| *allowed == e)
            })
            .unwrap_or(false)
    }

    /// Move a stable file into the accepted directory and enqueue it.
    fn accept_file(&self, inbox_path: &Path) -> anyhow::Result<()> {
        let bytes = std::fs::read(inbox_path)?;
        let fingerprint = hex::encode(Sha256::digest(&bytes));

        let accepted_path = self.accepted_path_for(inbox_path, &fingerprint);
        std::fs::rename(inbox_path, &accepted_path)?;

        let priority = priority_from_filename(inbox_path);
        let item = NewItem {
            source_path: accepted_path.clone(),
            origin_path: Some(inbox_path.to_path_buf()),
            fingerprint,
            priority,
        };

        match self.queue.enqueue(&item) {
            Ok(id) => {
                info!(
                    id,
                    path = %accepted_path.display(),
                    priority = priority.as_str(),
                    "enqueued document"
                );
                Ok(())
            }
            Err(RepositoryError::DuplicateItem(source)) => {
                warn!(source, "duplicate document already queued, keeping file");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn accepted_path_for(&self, inbox_path: &Path, fingerprint: &str) -> PathBuf {
        let stem = inbox_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");
        let short = &fingerprint[..8.min(fingerprint.len())];
        let name = match inbox_path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}-{}.{}", stem, short, ext.to_ascii_lowercase()),
            None => format!("{}-{}", stem, short),
        };
        self.config.accepted_dir.join(name)
    }

    /// Re-enqueue accepted files the queue has no record of. Covers the crash
    /// window between rename and enqueue.
    pub fn sweep_accepted(&self) -> anyhow::Result<usize> {
        let mut recovered = 0;

        for entry in std::fs::read_dir(&self.config.accepted_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() || !self.accepts_extension(&path) {
                continue;
            }

            let bytes = std::fs::read(&path)?;
            let item = NewItem {
                source_path: path.clone(),
                origin_path: None,
                fingerprint: hex::encode(Sha256::digest(&bytes)),
                priority: priority_from_filename(&path),
            };

            match self.queue.enqueue(&item) {
                Ok(id) => {
                    info!(id, path = %path.display(), "recovered unqueued accepted file");
                    recovered += 1;
                }
                Err(RepositoryError::DuplicateItem(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(recovered)
    }
}

/// Priority from filename markers. High markers win when both appear.
pub fn priority_from_filename(path: &Path) -> Priority {
    let name = match path.file_stem().and_then(|s| s.to_str()) {
        Some(s) => s.to_ascii_lowercase(),
        None => return Priority::Normal,
    };

    let has_marker = |markers: &[&str]| {
        markers.iter().any(|m| {
            name.split(|c: char| !c.is_alphanumeric())
                .any(|word| word == *m)
        })
    };

    if has_marker(HIGH_PRIORITY_MARKERS) {
        Priority::High
    } else if has_marker(LOW_PRIORITY_MARKERS) {
        Priority::Low
    } else {
        Priority::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_markers() {
        assert_eq!(
            priority_from_filename(Path::new("calc-exam-review.pdf")),
            Priority::High
        );
        assert_eq!(
            priority_from_filename(Path::new("ch3_practice_set.pdf")),
            Priority::Low
        );
        assert_eq!(
            priority_from_filename(Path::new("lecture-notes.pdf")),
            Priority::Normal
        );
        // High beats low when both markers appear.
        assert_eq!(
            priority_from_filename(Path::new("urgent-homework.pdf")),
            Priority::High
        );
        // Markers match whole words only.
        assert_eq!(
            priority_from_filename(Path::new("examples.pdf")),
            Priority::Normal
        );
    }

    fn watcher_in(dir: &Path) -> Watcher {
        let config = WatcherConfig {
            inbox_dir: dir.join("inbox"),
            accepted_dir: dir.join("accepted"),
            ..WatcherConfig::default()
        };
        let queue = QueueRepository::new(&dir.join("pipeline.db")).unwrap();
        Watcher::new(config, queue).unwrap()
    }

    #[test]
    fn test_file_enqueued_only_after_size_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = watcher_in(dir.path());
        let path = dir.path().join("inbox/notes.txt");

        std::fs::write(&path, b"partial").unwrap();
        watcher.scan_once().unwrap();
        assert!(path.exists());

        // Size changed between scans: still not stable.
        std::fs::write(&path, b"partial plus more").unwrap();
        watcher.scan_once().unwrap();
        assert!(path.exists());

        // Unchanged size on the next scan: accepted and moved.
        watcher.scan_once().unwrap();
        assert!(!path.exists());

        let stats = watcher.queue.queue_status().unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn test_empty_and_foreign_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = watcher_in(dir.path());

        std::fs::write(dir.path().join("inbox/empty.txt"), b"").unwrap();
        std::fs::write(dir.path().join("inbox/photo.jpg"), b"jpeg bytes").unwrap();

        watcher.scan_once().unwrap();
        watcher.scan_once().unwrap();
        watcher.scan_once().unwrap();

        let stats = watcher.queue.queue_status().unwrap();
        assert_eq!(stats.total(), 0);
    }

    #[test]
    fn test_accepted_name_carries_fingerprint_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = watcher_in(dir.path());
        std::fs::write(dir.path().join("inbox/notes.txt"), b"stable content").unwrap();

        watcher.scan_once().unwrap();
        watcher.scan_once().unwrap();

        let accepted: Vec<_> = std::fs::read_dir(dir.path().join("accepted"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(accepted.len(), 1);
        assert!(accepted[0].starts_with("notes-"));
        assert!(accepted[0].ends_with(".txt"));
    }

    #[test]
    fn test_sweep_recovers_unqueued_accepted_file() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher_in(dir.path());
        std::fs::write(dir.path().join("accepted/orphan.txt"), b"left behind").unwrap();

        assert_eq!(watcher.sweep_accepted().unwrap(), 1);
        // Second sweep sees the duplicate and recovers nothing.
        assert_eq!(watcher.sweep_accepted().unwrap(), 0);
    }
}
