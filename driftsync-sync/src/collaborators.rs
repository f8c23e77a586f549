//! Interfaces of the apply and reload engines and transaction completion.
//!
//! The orchestrator decides when to call these; what an apply or reload does
//! to the application set is theirs to decide.

use thiserror::Error;

use driftsync_core::{
    AppEntry, AppPathDomain, ApplyResponse, ReloadOption, ReloadResult, StoreError, Transaction,
};
use driftsync_repo::{RepoCache, RepoError};

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest<'a> {
    /// Apply file source, e.g. `github.com/acme/apps/prod.star`.
    pub path: &'a str,
    /// Glob over app paths; sync always applies `"all"`.
    pub scope: &'a str,
    pub approve: bool,
    pub dry_run: bool,
    pub promote: bool,
    pub reload: ReloadOption,
    pub git_branch: &'a str,
    /// Empty tracks the branch head.
    pub git_commit: &'a str,
    pub git_auth: Option<&'a str>,
    pub clobber: bool,
    pub force_reload: bool,
    /// When the branch head still equals this commit, the apply may be
    /// skipped and report `skipped_apply`. Empty forces a full apply.
    pub last_run_commit_id: &'a str,
    pub is_webhook: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub response: ApplyResponse,
    /// Apps changed by the apply, handed to transaction completion.
    pub updated_apps: Vec<AppPathDomain>,
}

pub trait Applier<T>: Send + Sync {
    fn apply(
        &self,
        tx: &mut T,
        req: &ApplyRequest<'_>,
        cache: &mut RepoCache,
    ) -> Result<ApplyOutcome, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadRequest<'a> {
    pub app: &'a AppEntry,
    pub approve: bool,
    pub dry_run: bool,
    pub promote: bool,
    pub git_branch: &'a str,
    pub git_commit: &'a str,
    pub git_auth: Option<&'a str>,
    pub force_reload: bool,
}

pub trait Reloader<T>: Send + Sync {
    fn reload(
        &self,
        tx: &mut T,
        req: &ReloadRequest<'_>,
        cache: &mut RepoCache,
    ) -> Result<ReloadResult, CollaboratorError>;
}

/// Commit plus any post-commit notification for the updated apps.
pub trait TransactionCompleter<T>: Send + Sync {
    fn complete_transaction(
        &self,
        tx: &mut T,
        updated_apps: &[AppPathDomain],
        dry_run: bool,
        reason: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Commits unless `dry_run`; no notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitCompleter;

impl<T: Transaction> TransactionCompleter<T> for CommitCompleter {
    fn complete_transaction(
        &self,
        tx: &mut T,
        updated_apps: &[AppPathDomain],
        dry_run: bool,
        reason: &str,
    ) -> Result<(), CollaboratorError> {
        if dry_run {
            tracing::debug!(reason, "dry run, transaction not committed");
            return Ok(());
        }
        tx.commit()?;
        tracing::info!(reason, updated_apps = updated_apps.len(), "transaction committed");
        Ok(())
    }
}
