//! Shared fixtures: a fake upstream, a fake apply engine that installs a
//! fixed app set, a scripted reloader, and a harness over a real FileStore.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use driftsync_core::{
    paths, AppEntry, AppPathDomain, ApplyResponse, FileStore, FileTransaction, MetadataStore,
    ReloadResult, SyncEntry, SyncId, SyncJobStatus, SyncMetadata, SystemConfig, Transaction,
};
use driftsync_repo::{
    CloneRequest, CommitInfo, GitAuth, GitBackend, RemoteRef, RepoCache, RepoCacheFactory,
};
use driftsync_sync::{
    Applier, ApplyOutcome, ApplyRequest, CollaboratorError, ReloadRequest, Reloader,
    SyncOrchestrator,
};
use tempfile::TempDir;

pub const SOURCE: &str = "github.com/acme/apps/prod.star";

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// Every repository has one branch, `main`, at `head`.
pub struct FakeUpstream {
    head: Mutex<String>,
    pub list_calls: Mutex<usize>,
}

impl FakeUpstream {
    pub fn new(head: &str) -> Self {
        Self {
            head: Mutex::new(head.to_string()),
            list_calls: Mutex::new(0),
        }
    }

    pub fn push(&self, head: &str) {
        *self.head.lock().unwrap() = head.to_string();
    }

    pub fn list_count(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }
}

impl GitBackend for FakeUpstream {
    fn list_refs(&self, _url: &str, _auth: &GitAuth) -> Result<Vec<RemoteRef>, git2::Error> {
        *self.list_calls.lock().unwrap() += 1;
        Ok(vec![RemoteRef {
            name: "refs/heads/main".to_string(),
            oid: self.head.lock().unwrap().clone(),
        }])
    }

    fn clone_checkout(&self, _req: &CloneRequest<'_>) -> Result<CommitInfo, git2::Error> {
        Err(git2::Error::from_str("clone not expected in sync tests"))
    }
}

// ---------------------------------------------------------------------------
// Apply engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyCall {
    pub path: String,
    pub dry_run: bool,
    pub last_run_commit_id: String,
}

/// Skips when the branch head equals the last run commit; otherwise
/// installs `apps` into the store.
pub struct FakeApplier {
    store: Arc<FileStore>,
    apps: Vec<AppEntry>,
    failures: Mutex<HashMap<String, String>>,
    /// Fail only after the apps were staged into the transaction.
    late_failures: Mutex<HashMap<String, String>>,
    pub calls: Mutex<Vec<ApplyCall>>,
}

impl FakeApplier {
    pub fn fail(&self, path: &str, error: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(path.to_string(), error.to_string());
    }

    pub fn fail_after_install(&self, path: &str, error: &str) {
        self.late_failures
            .lock()
            .unwrap()
            .insert(path.to_string(), error.to_string());
    }

    pub fn heal(&self, path: &str) {
        self.failures.lock().unwrap().remove(path);
        self.late_failures.lock().unwrap().remove(path);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> ApplyCall {
        self.calls.lock().unwrap().last().cloned().expect("apply was called")
    }
}

impl Applier<FileTransaction> for FakeApplier {
    fn apply(
        &self,
        tx: &mut FileTransaction,
        req: &ApplyRequest<'_>,
        cache: &mut RepoCache,
    ) -> Result<ApplyOutcome, CollaboratorError> {
        self.calls.lock().unwrap().push(ApplyCall {
            path: req.path.to_string(),
            dry_run: req.dry_run,
            last_run_commit_id: req.last_run_commit_id.to_string(),
        });
        if let Some(error) = self.failures.lock().unwrap().get(req.path) {
            return Err(CollaboratorError::Other(error.clone()));
        }

        let sha = cache.resolve_latest_commit(req.path, req.git_branch, req.git_auth)?;
        if !req.last_run_commit_id.is_empty() && sha == req.last_run_commit_id {
            return Ok(ApplyOutcome {
                response: ApplyResponse {
                    dry_run: req.dry_run,
                    commit_id: sha,
                    skipped_apply: true,
                    ..ApplyResponse::default()
                },
                updated_apps: Vec::new(),
            });
        }

        for app in &self.apps {
            self.store.put_app(tx, app)?;
        }
        if let Some(error) = self.late_failures.lock().unwrap().get(req.path) {
            return Err(CollaboratorError::Other(error.clone()));
        }
        let paths: Vec<AppPathDomain> = self.apps.iter().map(|a| a.path.clone()).collect();
        Ok(ApplyOutcome {
            response: ApplyResponse {
                dry_run: req.dry_run,
                commit_id: sha,
                create_results: paths.clone(),
                filtered_apps: paths.clone(),
                ..ApplyResponse::default()
            },
            updated_apps: paths,
        })
    }
}

// ---------------------------------------------------------------------------
// Reload engine
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeReloader {
    failures: Mutex<HashMap<AppPathDomain, String>>,
    pub calls: Mutex<Vec<(AppPathDomain, bool)>>,
}

impl FakeReloader {
    pub fn fail(&self, app: &AppPathDomain, error: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(app.clone(), error.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Reloader<FileTransaction> for FakeReloader {
    fn reload(
        &self,
        _tx: &mut FileTransaction,
        req: &ReloadRequest<'_>,
        _cache: &mut RepoCache,
    ) -> Result<ReloadResult, CollaboratorError> {
        self.calls
            .lock()
            .unwrap()
            .push((req.app.path.clone(), req.dry_run));
        if let Some(error) = self.failures.lock().unwrap().get(&req.app.path) {
            return Err(CollaboratorError::Other(error.clone()));
        }
        Ok(ReloadResult {
            dry_run: req.dry_run,
            reload_results: vec![req.app.path.clone()],
            ..ReloadResult::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub fn app(path: &str) -> AppEntry {
    AppEntry {
        id: format!("app_{}", path.trim_start_matches('/')),
        path: AppPathDomain::new(path, ""),
        source_url: format!("github.com/acme{path}"),
        is_dev: false,
        git_branch: "main".to_string(),
        git_auth_name: None,
    }
}

pub struct Harness {
    pub home: TempDir,
    pub store: Arc<FileStore>,
    pub upstream: Arc<FakeUpstream>,
    pub applier: Arc<FakeApplier>,
    pub reloader: Arc<FakeReloader>,
    pub orchestrator: SyncOrchestrator<FileStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SystemConfig::default())
    }

    pub fn with_config(config: SystemConfig) -> Self {
        let home = TempDir::new().expect("tempdir");
        let store = Arc::new(FileStore::open_at(home.path()).expect("open store"));
        let config = Arc::new(config);
        let upstream = Arc::new(FakeUpstream::new("abc123"));
        let caches = RepoCacheFactory::new(
            config.clone(),
            paths::app_src_dir(home.path()),
            upstream.clone(),
        );
        let applier = Arc::new(FakeApplier {
            store: store.clone(),
            apps: vec![app("/utils/disk"), app("/utils/mem")],
            failures: Mutex::new(HashMap::new()),
            late_failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        });
        let reloader = Arc::new(FakeReloader::default());
        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            config,
            caches,
            applier.clone(),
            reloader.clone(),
        );
        Self {
            home,
            store,
            upstream,
            applier,
            reloader,
            orchestrator,
        }
    }

    /// Committed state of an entry.
    pub fn entry(&self, id: &SyncId) -> SyncEntry {
        let tx = self.store.begin_transaction().expect("begin");
        self.store.get_sync_entry(&tx, id).expect("entry exists")
    }

    pub fn entry_count(&self) -> usize {
        let tx = self.store.begin_transaction().expect("begin");
        self.store.get_sync_entries(&tx).expect("list").len()
    }

    /// Persist a scheduled entry directly, bypassing creation.
    pub fn seed(&self, id: &str, frequency: i64, ran_mins_ago: Option<i64>, failures: u32) -> SyncId {
        let now = Utc::now();
        let entry = SyncEntry {
            id: SyncId::from(id),
            path: SOURCE.to_string(),
            is_scheduled: true,
            user_id: "admin".to_string(),
            metadata: SyncMetadata {
                schedule_frequency: frequency,
                ..SyncMetadata::default()
            },
            status: SyncJobStatus {
                last_execution_time: ran_mins_ago.map(|m| now - Duration::minutes(m)),
                failure_count: failures,
                ..SyncJobStatus::default()
            },
            created_at: now,
            updated_at: now,
        };
        let mut tx = self.store.begin_transaction().expect("begin");
        self.store.create_sync(&mut tx, &entry).expect("create");
        tx.commit().expect("commit");
        entry.id
    }

    /// Whether `path` has a committed app record.
    pub fn app_persisted(&self, path: &AppPathDomain) -> bool {
        let tx = self.store.begin_transaction().expect("begin");
        self.store.get_app(&tx, path).is_ok()
    }

    pub fn remove_app(&self, path: &AppPathDomain) {
        let mut tx = self.store.begin_transaction().expect("begin");
        self.store.delete_app(&mut tx, path).expect("delete app");
        tx.commit().expect("commit");
    }
}
