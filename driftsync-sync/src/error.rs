//! Error types for driftsync-sync.

use thiserror::Error;

use driftsync_core::StoreError;
use driftsync_repo::RepoError;

use crate::collaborators::CollaboratorError;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("repository error: {0}")]
    Repo(#[from] RepoError),

    /// Completing the transaction (commit or post-commit work) failed.
    #[error("transaction completion failed: {0}")]
    Completion(#[source] CollaboratorError),

    /// The run itself failed; carries the error text recorded in the status.
    #[error("{0}")]
    JobFailed(String),

    /// The full re-apply after a missing application asked for yet another rerun.
    #[error("unexpected error, sync rerun with no commit hash")]
    UnexpectedRerun,
}
