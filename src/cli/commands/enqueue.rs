//! Manual enqueue, for files that are already in place.

use std::path::{Path, PathBuf};

use console::style;
use sha2::{Digest, Sha256};

use crate::config::Settings;
use crate::models::{NewItem, Priority};
use crate::repository::{QueueRepository, RepositoryError};
use crate::watcher::priority_from_filename;

pub fn cmd_enqueue(
    settings: &Settings,
    files: &[PathBuf],
    priority: Option<&str>,
) -> anyhow::Result<()> {
    if files.is_empty() {
        anyhow::bail!("no files given");
    }

    let forced_priority = match priority {
        Some(p) => Some(
            Priority::from_str(p)
                .ok_or_else(|| anyhow::anyhow!("invalid priority '{}' (high, normal, low)", p))?,
        ),
        None => None,
    };

    std::fs::create_dir_all(&settings.data_dir.0)?;
    let queue = QueueRepository::new(&settings.db_path())?;

    for file in files {
        match enqueue_one(&queue, file, forced_priority) {
            Ok(id) => println!("  {} #{} {}", style("✓").green(), id, file.display()),
            Err(EnqueueError::Duplicate) => {
                println!(
                    "  {} {} already queued, skipped",
                    style("~").yellow(),
                    file.display()
                );
            }
            Err(EnqueueError::Other(e)) => {
                println!("  {} {}: {}", style("✗").red(), file.display(), e);
            }
        }
    }

    Ok(())
}

enum EnqueueError {
    Duplicate,
    Other(anyhow::Error),
}

fn enqueue_one(
    queue: &QueueRepository,
    file: &Path,
    forced_priority: Option<Priority>,
) -> Result<i64, EnqueueError> {
    let bytes = std::fs::read(file).map_err(|e| EnqueueError::Other(e.into()))?;

    let item = NewItem {
        source_path: file.to_path_buf(),
        origin_path: None,
        fingerprint: hex::encode(Sha256::digest(&bytes)),
        priority: forced_priority.unwrap_or_else(|| priority_from_filename(file)),
    };

    match queue.enqueue(&item) {
        Ok(id) => Ok(id),
        Err(RepositoryError::DuplicateItem(_)) => Err(EnqueueError::Duplicate),
        Err(e) => Err(EnqueueError::Other(e.into())),
    }
}
