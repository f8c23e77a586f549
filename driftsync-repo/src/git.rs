//! Git transport seam.
//!
//! [`GitBackend`] is the only place that talks to remotes; [`RepoCache`]
//! decides when to call it. Tests substitute a counting fake.
//!
//! [`RepoCache`]: crate::cache::RepoCache

use std::path::Path;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Direction, FetchOptions, Remote};

use crate::auth::GitAuth;

/// One advertised reference, e.g. `refs/heads/main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub name: String,
    pub oid: String,
}

#[derive(Debug, Clone)]
pub struct CloneRequest<'a> {
    pub url: &'a str,
    pub dest: &'a Path,
    pub branch: &'a str,
    /// Commit to check out; `None` tracks the branch head.
    pub commit: Option<&'a str>,
    /// Fetch only the tip commit.
    pub shallow: bool,
    pub auth: &'a GitAuth,
}

/// HEAD of a fresh checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub message: String,
    pub hash: String,
}

pub trait GitBackend: Send + Sync {
    /// List remote references without a working tree or any disk write.
    fn list_refs(&self, url: &str, auth: &GitAuth) -> Result<Vec<RemoteRef>, git2::Error>;

    /// Clone into `req.dest` (an existing, empty directory) and check out the
    /// requested commit or branch head.
    fn clone_checkout(&self, req: &CloneRequest<'_>) -> Result<CommitInfo, git2::Error>;
}

/// libgit2-backed transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct Git2Backend;

impl GitBackend for Git2Backend {
    fn list_refs(&self, url: &str, auth: &GitAuth) -> Result<Vec<RemoteRef>, git2::Error> {
        let mut remote = Remote::create_detached(url)?;
        let connection = remote.connect_auth(Direction::Fetch, Some(auth.callbacks()), None)?;
        let refs = connection
            .list()?
            .iter()
            .map(|head| RemoteRef {
                name: head.name().to_string(),
                oid: head.oid().to_string(),
            })
            .collect();
        Ok(refs)
    }

    fn clone_checkout(&self, req: &CloneRequest<'_>) -> Result<CommitInfo, git2::Error> {
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(req.auth.callbacks());
        if req.shallow {
            fetch.depth(1);
        }

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch);
        if req.commit.is_none() {
            // Single-branch clone of the tracked branch.
            let refspec = format!("+refs/heads/{0}:refs/remotes/origin/{0}", req.branch);
            builder.branch(req.branch);
            builder.remote_create(move |repo, name, url| repo.remote_with_fetch(name, url, &refspec));
        }
        let repo = builder.clone(req.url, req.dest)?;

        if let Some(commit) = req.commit {
            let target = repo.revparse_single(commit)?.peel_to_commit()?;
            repo.checkout_tree(target.as_object(), Some(CheckoutBuilder::new().force()))?;
            repo.set_head_detached(target.id())?;
        }

        let head = repo.head()?.peel_to_commit()?;
        let info = CommitInfo {
            message: head.message().unwrap_or_default().to_string(),
            hash: head.id().to_string(),
        };
        Ok(info)
    }
}
