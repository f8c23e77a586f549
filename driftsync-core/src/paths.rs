//! On-disk layout.
//!
//! ```text
//! ~/.driftsync/
//!   config.yaml
//!   syncs/<sync_id>.yaml     (one file per sync entry, mode 0600)
//!   apps/<hex(app)>.yaml     (one file per application record)
//!   app_src/<repo>[N]/       (persistent dev checkouts)
//!   run/last_tick.json       (daemon scheduler status)
//! ```

use std::path::{Path, PathBuf};

use crate::error::StoreError;

pub const CONFIG_FILE: &str = "config.yaml";

pub fn driftsync_root(home: &Path) -> PathBuf {
    home.join(".driftsync")
}

pub fn config_path(home: &Path) -> PathBuf {
    driftsync_root(home).join(CONFIG_FILE)
}

pub fn syncs_dir(root: &Path) -> PathBuf {
    root.join("syncs")
}

pub fn apps_dir(root: &Path) -> PathBuf {
    root.join("apps")
}

/// Root of persistent dev-mode checkouts. Never cleaned up automatically.
pub fn app_src_dir(home: &Path) -> PathBuf {
    driftsync_root(home).join("app_src")
}

pub fn run_dir(home: &Path) -> PathBuf {
    driftsync_root(home).join("run")
}

pub fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}
