//! Repository cache: resolves git sources to commit hashes and working trees
//! while cloning each (url, branch, commit, auth) at most once per cache.

pub mod auth;
pub mod cache;
pub mod error;
pub mod gate;
pub mod git;
pub mod url;

pub use auth::{resolve_auth, GitAuth, ResolvedAuth};
pub use cache::{CheckoutInfo, RepoCache, RepoCacheFactory, RepoKey};
pub use error::RepoError;
pub use gate::{AdmissionGate, GatePermit};
pub use git::{CloneRequest, CommitInfo, Git2Backend, GitBackend, RemoteRef};
pub use url::{is_local_url, parse_git_url, repo_name, ParsedUrl};
