//! Per-entry sync state machine.
//!
//! A run applies the entry's definitions, records the outcome in the entry
//! status, and accounts failures:
//!
//! ```text
//! Enabled ──fail──► Failing ──fail (count ≥ max)──► Disabled
//!    ▲                 │                               │
//!    └─────success─────┴───────────success─────────────┘
//! ```
//!
//! `Disabled` only stops the scheduler; manual runs always execute.

use std::sync::Arc;

use chrono::Utc;

use driftsync_core::{
    AppEntry, AppPathDomain, ApplyResponse, MetadataStore, ReloadOption, StoreError,
    SyncCreateResponse, SyncDeleteResponse, SyncEntry, SyncId, SyncJobStatus, SyncListResponse,
    SyncMetadata, SyncState, SystemConfig, Transaction,
};
use driftsync_repo::{RepoCache, RepoCacheFactory};

use crate::collaborators::{
    Applier, ApplyRequest, CommitCompleter, ReloadRequest, Reloader, TransactionCompleter,
};
use crate::error::SyncError;
use crate::ids;

/// Result of one sync job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Status as written to the store. `status.error` is set on failure.
    pub status: SyncJobStatus,
    /// Apps changed by a successful run; empty on failure.
    pub updated_apps: Vec<AppPathDomain>,
}

enum RunStep {
    Done(JobOutcome),
    /// A last-run app no longer exists; the optimized run was abandoned.
    AppsMissing,
}

pub struct SyncOrchestrator<S: MetadataStore> {
    pub(crate) store: Arc<S>,
    pub(crate) config: Arc<SystemConfig>,
    pub(crate) repo_caches: RepoCacheFactory,
    applier: Arc<dyn Applier<S::Tx>>,
    reloader: Arc<dyn Reloader<S::Tx>>,
    completer: Arc<dyn TransactionCompleter<S::Tx>>,
}

impl<S: MetadataStore> SyncOrchestrator<S> {
    pub fn new(
        store: Arc<S>,
        config: Arc<SystemConfig>,
        repo_caches: RepoCacheFactory,
        applier: Arc<dyn Applier<S::Tx>>,
        reloader: Arc<dyn Reloader<S::Tx>>,
    ) -> Self {
        Self {
            store,
            config,
            repo_caches,
            applier,
            reloader,
            completer: Arc::new(CommitCompleter),
        }
    }

    /// Replace the default commit-only transaction completion.
    pub fn with_completer(mut self, completer: Arc<dyn TransactionCompleter<S::Tx>>) -> Self {
        self.completer = completer;
        self
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // 1. Entry operations
    // -----------------------------------------------------------------------

    /// Create an entry and run it once. A failing first run aborts the
    /// creation and nothing is persisted.
    pub fn create_sync_entry(
        &self,
        path: &str,
        scheduled: bool,
        dry_run: bool,
        mut metadata: SyncMetadata,
        user_id: &str,
    ) -> Result<SyncCreateResponse, SyncError> {
        let mut tx = self.store.begin_transaction()?;

        let id = ids::new_sync_id();
        if !scheduled {
            metadata.webhook_secret = Some(ids::new_webhook_secret());
        } else if metadata.schedule_frequency <= 0 {
            metadata.schedule_frequency = self.config.default_schedule_mins;
        }
        metadata.webhook_url = None;

        let now = Utc::now();
        let entry = SyncEntry {
            id,
            path: path.to_string(),
            is_scheduled: scheduled,
            user_id: user_id.to_string(),
            metadata,
            status: SyncJobStatus::default(),
            created_at: now,
            updated_at: now,
        };
        self.store.create_sync(&mut tx, &entry)?;

        let outcome = self.run_sync_job(Some(&mut tx), &entry, dry_run, true, None)?;
        if let Some(error) = &outcome.status.error {
            return Err(SyncError::JobFailed(error.clone()));
        }

        let response = SyncCreateResponse {
            dry_run,
            id: entry.id.clone(),
            webhook_url: self.webhook_url(&entry),
            webhook_secret: entry.metadata.webhook_secret.clone(),
            schedule_frequency: entry.metadata.schedule_frequency,
            sync_job_status: outcome.status,
        };
        self.completer
            .complete_transaction(&mut tx, &outcome.updated_apps, dry_run, "create_sync")
            .map_err(SyncError::Completion)?;

        tracing::info!(entry = %entry.id, path, scheduled, dry_run, "sync entry created");
        Ok(response)
    }

    /// Run an entry now, regardless of its state or schedule.
    pub fn run_sync(&self, id: &SyncId, dry_run: bool) -> Result<SyncJobStatus, SyncError> {
        let mut tx = self.store.begin_transaction()?;
        let entry = self.store.get_sync_entry(&tx, id)?;

        let outcome = self.run_sync_job(Some(&mut tx), &entry, dry_run, true, None)?;
        if let Some(error) = &outcome.status.error {
            return Err(SyncError::JobFailed(error.clone()));
        }

        self.completer
            .complete_transaction(&mut tx, &outcome.updated_apps, dry_run, "sync_run")
            .map_err(SyncError::Completion)?;
        Ok(outcome.status)
    }

    pub fn delete_sync_entry(
        &self,
        id: &SyncId,
        dry_run: bool,
    ) -> Result<SyncDeleteResponse, SyncError> {
        let mut tx = self.store.begin_transaction()?;
        self.store.delete_sync(&mut tx, id)?;

        let response = SyncDeleteResponse {
            dry_run,
            id: id.clone(),
        };
        if dry_run {
            return Ok(response);
        }
        tx.commit()?;
        tracing::info!(entry = %id, "sync entry deleted");
        Ok(response)
    }

    pub fn list_sync_entries(&self) -> Result<SyncListResponse, SyncError> {
        let tx = self.store.begin_transaction()?;
        let mut entries = self.store.get_sync_entries(&tx)?;
        for entry in &mut entries {
            entry.metadata.webhook_url = self.webhook_url(entry);
        }
        Ok(SyncListResponse { entries })
    }

    /// `<webhook_base_url>/sync/<id>` for webhook entries, when a base URL
    /// is configured.
    fn webhook_url(&self, entry: &SyncEntry) -> Option<String> {
        if entry.is_scheduled {
            return None;
        }
        self.config
            .webhook_base_url
            .as_deref()
            .map(|base| format!("{}/sync/{}", base.trim_end_matches('/'), entry.id))
    }

    // -----------------------------------------------------------------------
    // 2. Sync job
    // -----------------------------------------------------------------------

    /// Run one sync job for `entry` and persist the resulting status.
    ///
    /// With a caller transaction the caller completes it; otherwise the job
    /// opens its own and completes it on success. Without a shared cache the
    /// job uses a private one, removed on return.
    ///
    /// A failed run is reported through `status.error`, not `Err`: `Err`
    /// means the status itself could not be produced or persisted.
    pub fn run_sync_job(
        &self,
        tx: Option<&mut S::Tx>,
        entry: &SyncEntry,
        dry_run: bool,
        check_commit_hash: bool,
        repo_cache: Option<&mut RepoCache>,
    ) -> Result<JobOutcome, SyncError> {
        let mut owned_tx;
        let (tx, owned) = match tx {
            Some(tx) => (tx, false),
            None => {
                owned_tx = self.store.begin_transaction()?;
                (&mut owned_tx, true)
            }
        };
        let mut private_cache;
        let cache = match repo_cache {
            Some(cache) => cache,
            None => {
                private_cache = self.repo_caches.open();
                &mut private_cache
            }
        };

        tracing::debug!(entry = %entry.id, dry_run, check_commit_hash, "running sync job");
        match self.attempt_optimized_run(tx, owned, entry, dry_run, check_commit_hash, cache)? {
            RunStep::Done(outcome) => Ok(outcome),
            RunStep::AppsMissing => {
                if !check_commit_hash {
                    return Err(SyncError::UnexpectedRerun);
                }
                if owned {
                    tx.rollback();
                }
                tracing::info!(entry = %entry.id, "app missing, rerunning full apply");
                self.fallback_full_run(tx, owned, entry, dry_run, cache)
            }
        }
    }

    /// Apply, and when the apply was skipped under `matched` reload, reload
    /// the last run's apps instead of re-applying.
    fn attempt_optimized_run(
        &self,
        tx: &mut S::Tx,
        owned: bool,
        entry: &SyncEntry,
        dry_run: bool,
        check_commit_hash: bool,
        cache: &mut RepoCache,
    ) -> Result<RunStep, SyncError> {
        let metadata = &entry.metadata;
        let last_run_apps = &entry.status.apply_response.filtered_apps;
        let last_run_commit_id = if check_commit_hash {
            entry.status.commit_id.as_str()
        } else {
            ""
        };

        let request = ApplyRequest {
            path: &entry.path,
            scope: "all",
            approve: metadata.approve,
            dry_run,
            promote: metadata.promote,
            reload: metadata.reload,
            git_branch: &metadata.git_branch,
            git_commit: "",
            git_auth: metadata.git_auth.as_deref(),
            clobber: metadata.clobber,
            force_reload: metadata.force_reload,
            last_run_commit_id,
            is_webhook: false,
        };

        let mut status = SyncJobStatus {
            last_execution_time: Some(Utc::now()),
            is_apply: true,
            state: SyncState::Enabled,
            ..SyncJobStatus::default()
        };
        let (mut response, mut updated_apps) = match self.applier.apply(tx, &request, cache) {
            Ok(outcome) => {
                status.commit_id = outcome.response.commit_id.clone();
                (outcome.response, outcome.updated_apps)
            }
            Err(err) => {
                tracing::error!(entry = %entry.id, error = %err, "apply failed");
                self.record_failure(&mut status, entry, err.to_string());
                let response = ApplyResponse {
                    dry_run,
                    filtered_apps: last_run_apps.clone(),
                    ..ApplyResponse::default()
                };
                (response, Vec::new())
            }
        };

        if status.error.is_none() && response.skipped_apply && metadata.reload == ReloadOption::Matched
        {
            if response.filtered_apps.is_empty() {
                response.filtered_apps = last_run_apps.clone();
            }

            let mut apps = Vec::with_capacity(last_run_apps.len());
            for path in last_run_apps {
                match self.store.get_app(tx, path) {
                    Ok(app) => apps.push(app),
                    Err(err) => {
                        tracing::warn!(entry = %entry.id, app = %path, error = %err, "last run app unavailable");
                        return Ok(RunStep::AppsMissing);
                    }
                }
            }
            self.reload_apps(tx, entry, dry_run, &apps, cache, &mut status, &mut response);
        }

        let status = self.finish_run(tx, owned, entry, dry_run, status, response, &mut updated_apps)?;
        Ok(RunStep::Done(JobOutcome {
            status,
            updated_apps,
        }))
    }

    /// Second phase after an abandoned optimized run: apply without the
    /// last-run commit, so nothing can be skipped.
    fn fallback_full_run(
        &self,
        tx: &mut S::Tx,
        owned: bool,
        entry: &SyncEntry,
        dry_run: bool,
        cache: &mut RepoCache,
    ) -> Result<JobOutcome, SyncError> {
        match self.attempt_optimized_run(tx, owned, entry, dry_run, false, cache)? {
            RunStep::Done(outcome) => Ok(outcome),
            RunStep::AppsMissing => Err(SyncError::UnexpectedRerun),
        }
    }

    /// Reload each app from its own source; the first failure stops the loop
    /// and is accounted like an apply failure. Results gathered so far are
    /// merged into `response` either way.
    #[allow(clippy::too_many_arguments)]
    fn reload_apps(
        &self,
        tx: &mut S::Tx,
        entry: &SyncEntry,
        dry_run: bool,
        apps: &[AppEntry],
        cache: &mut RepoCache,
        status: &mut SyncJobStatus,
        response: &mut ApplyResponse,
    ) {
        for app in apps {
            let request = ReloadRequest {
                app,
                approve: entry.metadata.approve,
                dry_run,
                promote: entry.metadata.promote,
                git_branch: &app.git_branch,
                git_commit: "",
                git_auth: app.git_auth_name.as_deref(),
                force_reload: entry.metadata.force_reload,
            };
            match self.reloader.reload(tx, &request, cache) {
                Ok(result) => {
                    response.reload_results.extend(result.reload_results);
                    response.approve_results.extend(result.approve_result);
                    response.promote_results.extend(result.promote_results);
                }
                Err(err) => {
                    tracing::error!(entry = %entry.id, app = %app.path, error = %err, "reload failed");
                    self.record_failure(status, entry, err.to_string());
                    break;
                }
            }
        }
    }

    fn record_failure(&self, status: &mut SyncJobStatus, entry: &SyncEntry, error: String) {
        let max = self.config.max_sync_failure_count;
        status.error = Some(error);
        status.failure_count = entry.status.failure_count.saturating_add(1);
        status.state = SyncState::after_failure(status.failure_count, max);
    }

    /// Persist the status. A failed run discards everything the run wrote
    /// and records the failure in a fresh transaction.
    #[allow(clippy::too_many_arguments)]
    fn finish_run(
        &self,
        tx: &mut S::Tx,
        owned: bool,
        entry: &SyncEntry,
        dry_run: bool,
        mut status: SyncJobStatus,
        response: ApplyResponse,
        updated_apps: &mut Vec<AppPathDomain>,
    ) -> Result<SyncJobStatus, SyncError> {
        status.apply_response = response;

        if status.error.is_some() {
            tx.rollback();
            updated_apps.clear();

            let mut failure_tx = self.store.begin_transaction()?;
            match self.store.update_sync_status(&mut failure_tx, &entry.id, &status) {
                Ok(()) if dry_run => {}
                Ok(()) => failure_tx.commit()?,
                // The entry was being created in the rolled back transaction.
                Err(StoreError::SyncNotFound { .. }) => {
                    tracing::debug!(entry = %entry.id, "entry not persisted, failure status dropped");
                }
                Err(err) => return Err(err.into()),
            }
            tracing::warn!(
                entry = %entry.id,
                failure_count = status.failure_count,
                state = %status.state,
                "sync job failed",
            );
            return Ok(status);
        }

        self.store.update_sync_status(tx, &entry.id, &status)?;
        if owned {
            self.completer
                .complete_transaction(tx, updated_apps, dry_run, "sync")
                .map_err(SyncError::Completion)?;
        }
        tracing::info!(
            entry = %entry.id,
            commit = %status.commit_id,
            skipped_apply = status.apply_response.skipped_apply,
            "sync job succeeded",
        );
        Ok(status)
    }
}

impl<S: MetadataStore> std::fmt::Debug for SyncOrchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("config", &self.config)
            .field("repo_caches", &self.repo_caches)
            .finish_non_exhaustive()
    }
}
