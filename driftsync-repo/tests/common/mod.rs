//! Shared fixtures: a counting fake backend and real git2 upstreams.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use driftsync_repo::{CloneRequest, CommitInfo, GitAuth, GitBackend, RemoteRef};

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneCall {
    pub url: String,
    pub branch: String,
    pub commit: Option<String>,
    pub shallow: bool,
}

/// Serves refs from a fixed table and records every call.
#[derive(Default)]
pub struct FakeBackend {
    heads: Mutex<HashMap<String, Vec<RemoteRef>>>,
    pub list_calls: Mutex<Vec<String>>,
    pub clone_calls: Mutex<Vec<CloneCall>>,
}

impl FakeBackend {
    pub fn with_branch(self, url: &str, branch: &str, oid: &str) -> Self {
        self.heads
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(RemoteRef {
                name: format!("refs/heads/{branch}"),
                oid: oid.to_string(),
            });
        self
    }

    pub fn list_count(&self) -> usize {
        self.list_calls.lock().unwrap().len()
    }

    pub fn clone_count(&self) -> usize {
        self.clone_calls.lock().unwrap().len()
    }
}

impl GitBackend for FakeBackend {
    fn list_refs(&self, url: &str, _auth: &GitAuth) -> Result<Vec<RemoteRef>, git2::Error> {
        self.list_calls.lock().unwrap().push(url.to_string());
        self.heads
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| git2::Error::from_str("repository not found"))
    }

    fn clone_checkout(&self, req: &CloneRequest<'_>) -> Result<CommitInfo, git2::Error> {
        self.clone_calls.lock().unwrap().push(CloneCall {
            url: req.url.to_string(),
            branch: req.branch.to_string(),
            commit: req.commit.map(str::to_string),
            shallow: req.shallow,
        });
        let heads = self.heads.lock().unwrap();
        let want = format!("refs/heads/{}", req.branch);
        let oid = match req.commit {
            Some(commit) => commit.to_string(),
            None => heads
                .get(req.url)
                .and_then(|refs| refs.iter().find(|r| r.name == want))
                .map(|r| r.oid.clone())
                .ok_or_else(|| git2::Error::from_str("remote branch not found"))?,
        };
        fs::write(req.dest.join("app.star"), format!("# {oid}\n"))
            .map_err(|e| git2::Error::from_str(&e.to_string()))?;
        Ok(CommitInfo {
            message: format!("commit {oid}"),
            hash: oid,
        })
    }
}

// ---------------------------------------------------------------------------
// Real upstream repositories
// ---------------------------------------------------------------------------

/// Initialise a repository whose HEAD points at `main`.
pub fn upstream_repo(path: &Path) -> git2::Repository {
    let repo = git2::Repository::init(path)
        .unwrap_or_else(|e| panic!("upstream_repo: init {}: {e}", path.display()));
    repo.set_head("refs/heads/main").expect("set HEAD to main");
    repo
}

/// Write `name` with `contents` and commit it on HEAD.
pub fn commit_file(repo: &git2::Repository, name: &str, contents: &str, message: &str) -> git2::Oid {
    let workdir = repo.workdir().expect("workdir");
    fs::write(workdir.join(name), contents).expect("write file");
    let mut index = repo.index().expect("index");
    index.add_path(Path::new(name)).expect("add");
    index.write().expect("write index");
    let tree = repo.find_tree(index.write_tree().expect("tree")).expect("find tree");
    let sig = git2::Signature::now("driftsync", "driftsync@example.com").expect("signature");
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .expect("commit")
}
