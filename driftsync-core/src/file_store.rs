//! YAML-backed [`MetadataStore`].
//!
//! # Storage layout
//!
//! ```text
//! <root>/
//!   syncs/<sync_id>.yaml   (mode 0600)
//!   apps/<hex(app)>.yaml   (mode 0600)
//! ```
//!
//! Transactions stage writes in memory. `commit` applies them under a
//! store-wide lock, one atomic `.tmp` + rename per file; a crash mid-commit
//! can leave a prefix of the writes applied.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, StoreError};
use crate::paths;
use crate::store::{MetadataStore, Transaction};
use crate::types::{AppEntry, AppPathDomain, SyncEntry, SyncId, SyncJobStatus};

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    commit_lock: Arc<Mutex<()>>,
}

/// Staged writes; `None` marks a delete.
#[derive(Debug)]
pub struct FileTransaction {
    root: PathBuf,
    commit_lock: Arc<Mutex<()>>,
    syncs: BTreeMap<SyncId, Option<SyncEntry>>,
    apps: BTreeMap<AppPathDomain, Option<AppEntry>>,
}

// ---------------------------------------------------------------------------
// 1. Open
// ---------------------------------------------------------------------------

impl FileStore {
    /// Open the store under `<home>/.driftsync/`.
    pub fn open_at(home: &Path) -> Result<Self, StoreError> {
        Self::open(paths::driftsync_root(home))
    }

    /// Open (creating if needed, mode `0700`) a store rooted at `root`.
    pub fn open(root: PathBuf) -> Result<Self, StoreError> {
        for dir in [paths::syncs_dir(&root), paths::apps_dir(&root)] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
                set_dir_permissions(&dir)?;
            }
        }
        Ok(Self {
            root,
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stage an application record. Application records are owned by the
    /// apply engine; sync only reads them.
    pub fn put_app(&self, tx: &mut FileTransaction, app: &AppEntry) -> Result<(), StoreError> {
        tx.apps.insert(app.path.clone(), Some(app.clone()));
        Ok(())
    }

    pub fn delete_app(
        &self,
        tx: &mut FileTransaction,
        path: &AppPathDomain,
    ) -> Result<(), StoreError> {
        tx.apps.insert(path.clone(), None);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 2. Store contract
// ---------------------------------------------------------------------------

impl MetadataStore for FileStore {
    type Tx = FileTransaction;

    fn begin_transaction(&self) -> Result<FileTransaction, StoreError> {
        Ok(FileTransaction {
            root: self.root.clone(),
            commit_lock: self.commit_lock.clone(),
            syncs: BTreeMap::new(),
            apps: BTreeMap::new(),
        })
    }

    fn create_sync(&self, tx: &mut FileTransaction, entry: &SyncEntry) -> Result<(), StoreError> {
        if self.lookup_sync(tx, &entry.id)?.is_some() {
            return Err(StoreError::SyncExists {
                id: entry.id.clone(),
            });
        }
        tx.syncs.insert(entry.id.clone(), Some(entry.clone()));
        Ok(())
    }

    fn get_sync_entry(&self, tx: &FileTransaction, id: &SyncId) -> Result<SyncEntry, StoreError> {
        self.lookup_sync(tx, id)?
            .ok_or_else(|| StoreError::SyncNotFound { id: id.clone() })
    }

    fn get_sync_entries(&self, tx: &FileTransaction) -> Result<Vec<SyncEntry>, StoreError> {
        let dir = paths::syncs_dir(&self.root);
        let mut entries = BTreeMap::new();
        for dir_entry in std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
            let dir_entry = dir_entry.map_err(|e| io_err(&dir, e))?;
            let path = dir_entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("yaml") {
                continue;
            }
            let entry: SyncEntry = read_yaml(&path)?;
            entries.insert(entry.id.clone(), entry);
        }
        for (id, staged) in &tx.syncs {
            match staged {
                Some(entry) => entries.insert(id.clone(), entry.clone()),
                None => entries.remove(id),
            };
        }
        Ok(entries.into_values().collect())
    }

    fn update_sync_status(
        &self,
        tx: &mut FileTransaction,
        id: &SyncId,
        status: &SyncJobStatus,
    ) -> Result<(), StoreError> {
        let mut entry = self.get_sync_entry(tx, id)?;
        entry.status = status.clone();
        entry.updated_at = Utc::now();
        tx.syncs.insert(id.clone(), Some(entry));
        Ok(())
    }

    fn delete_sync(&self, tx: &mut FileTransaction, id: &SyncId) -> Result<(), StoreError> {
        if self.lookup_sync(tx, id)?.is_none() {
            return Err(StoreError::SyncNotFound { id: id.clone() });
        }
        tx.syncs.insert(id.clone(), None);
        Ok(())
    }

    fn get_app(&self, tx: &FileTransaction, path: &AppPathDomain) -> Result<AppEntry, StoreError> {
        let found = match tx.apps.get(path) {
            Some(staged) => staged.clone(),
            None => {
                let file = app_path(&self.root, path);
                file.exists().then(|| read_yaml(&file)).transpose()?
            }
        };
        found.ok_or_else(|| StoreError::AppNotFound { app: path.clone() })
    }
}

impl FileStore {
    fn lookup_sync(
        &self,
        tx: &FileTransaction,
        id: &SyncId,
    ) -> Result<Option<SyncEntry>, StoreError> {
        if let Some(staged) = tx.syncs.get(id) {
            return Ok(staged.clone());
        }
        let file = sync_path(&self.root, id);
        if !file.exists() {
            return Ok(None);
        }
        read_yaml(&file).map(Some)
    }
}

// ---------------------------------------------------------------------------
// 3. Transactions
// ---------------------------------------------------------------------------

impl Transaction for FileTransaction {
    fn commit(&mut self) -> Result<(), StoreError> {
        let _guard = self
            .commit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let syncs = std::mem::take(&mut self.syncs);
        let apps = std::mem::take(&mut self.apps);
        for (id, staged) in syncs {
            let path = sync_path(&self.root, &id);
            match staged {
                Some(mut entry) => {
                    // Derived on read.
                    entry.metadata.webhook_url = None;
                    write_yaml(&path, &entry)?
                }
                None => remove_file(&path)?,
            }
        }
        for (app, staged) in apps {
            let path = app_path(&self.root, &app);
            match staged {
                Some(entry) => write_yaml(&path, &entry)?,
                None => remove_file(&path)?,
            }
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.syncs.clear();
        self.apps.clear();
    }
}

impl Drop for FileTransaction {
    fn drop(&mut self) {
        if !self.syncs.is_empty() || !self.apps.is_empty() {
            tracing::debug!(
                syncs = self.syncs.len(),
                apps = self.apps.len(),
                "discarding uncommitted transaction",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn sync_path(root: &Path, id: &SyncId) -> PathBuf {
    paths::syncs_dir(root).join(format!("{}.yaml", id.0))
}

fn app_path(root: &Path, app: &AppPathDomain) -> PathBuf {
    paths::apps_dir(root).join(format!("{}.yaml", hex::encode(app.to_string())))
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let yaml = serde_yaml::to_string(value)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

fn remove_file(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
