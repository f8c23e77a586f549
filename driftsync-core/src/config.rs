//! System configuration loaded from `~/.driftsync/config.yaml`.
//!
//! Every field has a default, so a missing file or a partial file is valid.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::paths;

/// One named git credential profile.
///
/// A profile with a `key_file` authenticates over SSH; otherwise `user` and
/// `password` (or a personal access token in `password`) are sent as HTTP
/// basic auth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitAuthEntry {
    #[serde(default = "default_git_user")]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_git_user() -> String {
    "git".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Consecutive failures after which the scheduler stops picking an entry.
    pub max_sync_failure_count: u32,
    /// Frequency applied to scheduled entries created without one.
    pub default_schedule_mins: i64,
    /// Period of the scheduler tick.
    pub sync_interval_secs: u64,
    /// Profile used when an entry or app names none.
    pub default_git_auth: Option<String>,
    pub git_auth: BTreeMap<String, GitAuthEntry>,
    pub max_concurrent_clones: usize,
    pub max_clone_wait_secs: u64,
    /// Public base URL used to derive webhook URLs for webhook entries.
    pub webhook_base_url: Option<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_sync_failure_count: 10,
            default_schedule_mins: 15,
            sync_interval_secs: 60,
            default_git_auth: None,
            git_auth: BTreeMap::new(),
            max_concurrent_clones: 4,
            max_clone_wait_secs: 300,
            webhook_base_url: None,
        }
    }
}

impl SystemConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn max_clone_wait(&self) -> Duration {
        Duration::from_secs(self.max_clone_wait_secs)
    }
}

/// Load `<home>/.driftsync/config.yaml`, falling back to defaults when absent.
///
/// Returns `StoreError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<SystemConfig, StoreError> {
    let path = paths::config_path(home);
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(SystemConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SystemConfig, StoreError> {
    load_at(&paths::home()?)
}
