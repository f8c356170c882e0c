//! Configuration loading.
//!
//! Everything has a usable default; a TOML file overrides per section and
//! `.env` / environment variables cover the deploy-time bits (see cli).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::analysis::AnalysisConfig;
use crate::breaker::BreakerConfig;
use crate::monitor::MonitorConfig;
use crate::pipeline::PipelineConfig;
use crate::repository::RetryPolicy;
use crate::watcher::WatcherConfig;

pub const DEFAULT_CONFIG_FILE: &str = "hopper.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// Processing items older than this are presumed orphaned at startup.
    pub stale_after_secs: u64,
    /// Done items older than this are purged by cleanup.
    pub cleanup_done_after_days: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_secs: 60,
            max_backoff_secs: 900,
            stale_after_secs: 1800,
            cleanup_done_after_days: 7,
        }
    }
}

impl QueueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_backoff: Duration::from_secs(self.base_backoff_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: DataDir,
    pub watcher: WatcherConfig,
    pub queue: QueueConfig,
    pub pipeline: PipelineConfig,
    pub breaker: BreakerConfig,
    pub monitor: MonitorConfig,
    pub analysis: AnalysisConfig,
}

/// Newtype so `data_dir = "path"` deserializes directly.
#[derive(Debug, Clone, Deserialize)]
pub struct DataDir(pub PathBuf);

impl Default for DataDir {
    fn default() -> Self {
        Self(PathBuf::from("data"))
    }
}

impl Settings {
    /// Load from an explicit path, or from `hopper.toml` when present, or
    /// fall back to defaults. An explicit path that does not exist is an
    /// error; the implicit one is not.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let implicit = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !implicit.exists() {
                    return Ok(Self::default());
                }
                implicit
            }
        };

        let raw = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;
        let settings: Settings = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {}: {}", path.display(), e))?;
        Ok(settings)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.0.join("pipeline.db")
    }
}
