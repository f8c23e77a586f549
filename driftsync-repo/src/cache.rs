//! Per-cycle repository cache.
//!
//! Two independent maps keyed by [`RepoKey`]:
//! - **shas**: latest branch-head hash from a ref listing (commit always empty)
//! - **checkouts**: materialized working trees from clone + checkout
//!
//! A key is cloned at most once per cache. Non-dev checkouts live under a
//! private temporary root removed by [`RepoCache::cleanup`] (also on drop).
//! Dev checkouts go under the persistent dev root and are never removed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use driftsync_core::SystemConfig;
use tempfile::TempDir;

use crate::auth::resolve_auth;
use crate::error::{io_err, RepoError};
use crate::gate::AdmissionGate;
use crate::git::{CloneRequest, Git2Backend, GitBackend};
use crate::url::{is_local_url, parse_git_url, repo_name};

const TEMP_PREFIX: &str = "driftsync_git_";

/// Cache key. `url` is the normalized clone URL and `auth` the effective
/// profile name, so two sources that resolve to the same repository share
/// a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoKey {
    pub url: String,
    pub branch: String,
    pub commit: String,
    pub auth: String,
}

#[derive(Debug, Clone)]
struct CacheDir {
    dir: PathBuf,
    commit_message: String,
    hash: String,
    persistent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutInfo {
    pub dir: PathBuf,
    /// Sub-path inside `dir` named by the source URL.
    pub sub_path: String,
    pub commit_message: String,
    pub commit_hash: String,
}

pub struct RepoCache {
    config: Arc<SystemConfig>,
    dev_root: PathBuf,
    backend: Arc<dyn GitBackend>,
    gate: Option<Arc<AdmissionGate>>,
    root: Option<TempDir>,
    next_dir: usize,
    checkouts: HashMap<RepoKey, CacheDir>,
    shas: HashMap<RepoKey, String>,
}

impl std::fmt::Debug for RepoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoCache")
            .field("dev_root", &self.dev_root)
            .field("root", &self.root.as_ref().map(TempDir::path))
            .field("checkouts", &self.checkouts.len())
            .field("shas", &self.shas.len())
            .finish_non_exhaustive()
    }
}

impl RepoCache {
    pub fn new(
        config: Arc<SystemConfig>,
        dev_root: PathBuf,
        backend: Arc<dyn GitBackend>,
        gate: Option<Arc<AdmissionGate>>,
    ) -> Self {
        Self {
            config,
            dev_root,
            backend,
            gate,
            root: None,
            next_dir: 0,
            checkouts: HashMap::new(),
            shas: HashMap::new(),
        }
    }

    /// Hash of the head of `branch`, without cloning.
    pub fn resolve_latest_commit(
        &mut self,
        source_url: &str,
        branch: &str,
        auth_profile: Option<&str>,
    ) -> Result<String, RepoError> {
        let resolved = resolve_auth(&self.config, auth_profile)?;
        let parsed = parse_git_url(source_url, resolved.auth.using_ssh())?;
        let key = RepoKey {
            url: parsed.repo_url,
            branch: branch.to_string(),
            commit: String::new(),
            auth: resolved.name,
        };
        if let Some(sha) = self.shas.get(&key) {
            return Ok(sha.clone());
        }

        if !key.auth.is_empty() {
            tracing::info!(auth = %key.auth, "using git auth");
        }
        let refs = self
            .backend
            .list_refs(&key.url, &resolved.auth)
            .map_err(|source| RepoError::RemoteList {
                url: key.url.clone(),
                source,
            })?;
        let want = format!("refs/heads/{branch}");
        let sha = refs
            .into_iter()
            .find(|r| r.name == want)
            .map(|r| r.oid)
            .ok_or_else(|| RepoError::BranchNotFound {
                branch: branch.to_string(),
                url: key.url.clone(),
            })?;

        tracing::debug!(repo = %key.url, branch, sha = %sha, "resolved branch head");
        self.shas.insert(key, sha.clone());
        Ok(sha)
    }

    /// Materialize `source_url` at `commit` (or the head of `branch`).
    pub fn checkout_repo(
        &mut self,
        source_url: &str,
        branch: &str,
        commit: Option<&str>,
        auth_profile: Option<&str>,
        is_dev: bool,
    ) -> Result<CheckoutInfo, RepoError> {
        let resolved = resolve_auth(&self.config, auth_profile)?;
        let parsed = parse_git_url(source_url, resolved.auth.using_ssh())?;
        let commit = commit.filter(|c| !c.is_empty());
        let key = RepoKey {
            url: parsed.repo_url,
            branch: branch.to_string(),
            commit: commit.unwrap_or_default().to_string(),
            auth: resolved.name,
        };
        if let Some(cached) = self.checkouts.get(&key) {
            return Ok(CheckoutInfo {
                dir: cached.dir.clone(),
                sub_path: parsed.sub_path,
                commit_message: cached.commit_message.clone(),
                commit_hash: cached.hash.clone(),
            });
        }

        let _permit = self.gate.as_ref().map(|gate| gate.acquire()).transpose()?;
        let dest = if is_dev {
            let dest = unused_repo_path(&self.dev_root, &repo_name(&key.url));
            std::fs::create_dir_all(&dest).map_err(|e| io_err(&dest, e))?;
            dest
        } else {
            self.next_temp_dir()?
        };

        if !key.auth.is_empty() {
            tracing::info!(auth = %key.auth, "using git auth");
        }
        tracing::info!(repo = %key.url, dest = %dest.display(), "cloning git repo");
        let request = CloneRequest {
            url: &key.url,
            dest: &dest,
            branch,
            commit,
            shallow: commit.is_none() && !is_dev && !is_local_url(&key.url),
            auth: &resolved.auth,
        };
        let head = self
            .backend
            .clone_checkout(&request)
            .map_err(|source| RepoError::Checkout {
                branch: branch.to_string(),
                commit: key.commit.clone(),
                source,
            })?;

        let info = CheckoutInfo {
            dir: dest.clone(),
            sub_path: parsed.sub_path,
            commit_message: head.message.clone(),
            commit_hash: head.hash.clone(),
        };
        self.checkouts.insert(
            key,
            CacheDir {
                dir: dest,
                commit_message: head.message,
                hash: head.hash,
                persistent: is_dev,
            },
        );
        Ok(info)
    }

    /// Remove the private temporary root. Idempotent; dev checkouts and the
    /// sha map survive, and later checkouts allocate a fresh root.
    pub fn cleanup(&mut self) {
        self.checkouts.retain(|_, dir| dir.persistent);
        if let Some(root) = self.root.take() {
            let path = root.path().to_path_buf();
            if let Err(err) = root.close() {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove repo cache dir");
            }
        }
    }

    fn next_temp_dir(&mut self) -> Result<PathBuf, RepoError> {
        let root = match &self.root {
            Some(root) => root.path().to_path_buf(),
            None => {
                let root = tempfile::Builder::new()
                    .prefix(TEMP_PREFIX)
                    .tempdir()
                    .map_err(|e| io_err(std::env::temp_dir(), e))?;
                let path = root.path().to_path_buf();
                self.root = Some(root);
                path
            }
        };
        self.next_dir += 1;
        let dir = root.join(format!("repo_{}", self.next_dir));
        std::fs::create_dir(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(dir)
    }
}

impl Drop for RepoCache {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// First free `<root>/<name>`, `<root>/<name>2`, `<root>/<name>3`, ...
pub(crate) fn unused_repo_path(root: &Path, name: &str) -> PathBuf {
    let first = root.join(name);
    if !first.exists() {
        return first;
    }
    (2..)
        .map(|n| root.join(format!("{name}{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds caches that share one backend and one admission gate.
#[derive(Clone)]
pub struct RepoCacheFactory {
    config: Arc<SystemConfig>,
    dev_root: PathBuf,
    backend: Arc<dyn GitBackend>,
    gate: Arc<AdmissionGate>,
}

impl RepoCacheFactory {
    pub fn new(config: Arc<SystemConfig>, dev_root: PathBuf, backend: Arc<dyn GitBackend>) -> Self {
        let gate = Arc::new(AdmissionGate::new(
            config.max_concurrent_clones,
            config.max_clone_wait(),
        ));
        Self {
            config,
            dev_root,
            backend,
            gate,
        }
    }

    /// Factory over libgit2.
    pub fn with_git2(config: Arc<SystemConfig>, dev_root: PathBuf) -> Self {
        Self::new(config, dev_root, Arc::new(Git2Backend))
    }

    pub fn open(&self) -> RepoCache {
        RepoCache::new(
            self.config.clone(),
            self.dev_root.clone(),
            self.backend.clone(),
            Some(self.gate.clone()),
        )
    }

    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }
}

impl std::fmt::Debug for RepoCacheFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoCacheFactory")
            .field("dev_root", &self.dev_root)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}
