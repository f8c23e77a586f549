//! Git credential profiles.
//!
//! Profiles are named in `SystemConfig::git_auth`. An entry or app with no
//! profile uses `default_git_auth`; with neither, access is anonymous.

use std::fmt;
use std::path::PathBuf;

use driftsync_core::SystemConfig;
use git2::{Cred, RemoteCallbacks};

use crate::error::RepoError;

#[derive(Clone, PartialEq, Eq)]
pub enum GitAuth {
    Anonymous,
    Ssh {
        user: String,
        key_file: PathBuf,
        passphrase: Option<String>,
    },
    /// Username with a password or personal access token.
    Basic { user: String, password: String },
}

impl fmt::Debug for GitAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitAuth::Anonymous => write!(f, "Anonymous"),
            GitAuth::Ssh { user, key_file, .. } => f
                .debug_struct("Ssh")
                .field("user", user)
                .field("key_file", key_file)
                .finish_non_exhaustive(),
            GitAuth::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .finish_non_exhaustive(),
        }
    }
}

impl GitAuth {
    pub fn using_ssh(&self) -> bool {
        matches!(self, GitAuth::Ssh { .. })
    }

    /// Remote callbacks answering credential requests for this profile.
    ///
    /// Credentials are offered once per connection; a second request means
    /// the remote rejected them, and is answered with an error instead of
    /// letting libgit2 retry forever.
    pub fn callbacks(&self) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();
        let mut offered = false;
        match self.clone() {
            GitAuth::Anonymous => {}
            GitAuth::Ssh {
                user,
                key_file,
                passphrase,
            } => {
                callbacks.credentials(move |_url, username_from_url, _allowed| {
                    if std::mem::replace(&mut offered, true) {
                        return Err(git2::Error::from_str("ssh key rejected by remote"));
                    }
                    let user = username_from_url.unwrap_or(&user);
                    Cred::ssh_key(user, None, &key_file, passphrase.as_deref())
                });
            }
            GitAuth::Basic { user, password } => {
                callbacks.credentials(move |_url, _username_from_url, _allowed| {
                    if std::mem::replace(&mut offered, true) {
                        return Err(git2::Error::from_str("credentials rejected by remote"));
                    }
                    Cred::userpass_plaintext(&user, &password)
                });
            }
        }
        callbacks
    }
}

/// A resolved profile. `name` is the effective profile name (after the
/// default fallback), empty for anonymous access; it is part of cache keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAuth {
    pub name: String,
    pub auth: GitAuth,
}

pub fn resolve_auth(config: &SystemConfig, profile: Option<&str>) -> Result<ResolvedAuth, RepoError> {
    let name = profile
        .filter(|p| !p.is_empty())
        .or(config.default_git_auth.as_deref())
        .unwrap_or_default();
    if name.is_empty() {
        return Ok(ResolvedAuth {
            name: String::new(),
            auth: GitAuth::Anonymous,
        });
    }

    let entry = config
        .git_auth
        .get(name)
        .ok_or_else(|| RepoError::AuthResolution {
            profile: name.to_string(),
        })?;
    let auth = match &entry.key_file {
        Some(key_file) => GitAuth::Ssh {
            user: entry.user.clone(),
            key_file: key_file.clone(),
            passphrase: entry.password.clone(),
        },
        None => GitAuth::Basic {
            user: entry.user.clone(),
            password: entry.password.clone().unwrap_or_default(),
        },
    };
    Ok(ResolvedAuth {
        name: name.to_string(),
        auth,
    })
}
