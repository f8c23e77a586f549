//! Error types for driftsync-repo.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// All errors that can arise while resolving or materializing repositories.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The named git auth profile is not configured.
    #[error("unknown git auth profile {profile:?}")]
    AuthResolution { profile: String },

    #[error("invalid git url {url:?}: expected host/org/repo[/path]")]
    InvalidUrl { url: String },

    #[error("branch {branch:?} not found in {url}")]
    BranchNotFound { branch: String, url: String },

    #[error("could not list remote refs of {url}: {source}")]
    RemoteList {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("error checking out branch {branch} commit {commit}: {source}")]
    Checkout {
        branch: String,
        commit: String,
        #[source]
        source: git2::Error,
    },

    /// No clone slot became free within the configured wait.
    #[error("timed out after {waited:?} waiting for a clone slot")]
    CloneGateTimeout { waited: Duration },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`RepoError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RepoError {
    RepoError::Io {
        path: path.into(),
        source,
    }
}
