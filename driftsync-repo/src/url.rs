//! Source URL normalization.
//!
//! A sync or app source names a path inside a repository, e.g.
//! `github.com/acme/apps/prod/app.star`. The first three components pick the
//! repository; the rest is the sub-path inside the checkout.

use std::path::Path;

use crate::error::RepoError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    /// URL handed to git.
    pub repo_url: String,
    /// Directory inside the checkout; empty for the repository root.
    pub sub_path: String,
}

impl ParsedUrl {
    fn whole(url: &str) -> Self {
        Self {
            repo_url: url.to_string(),
            sub_path: String::new(),
        }
    }
}

/// Split `source` into a clone URL and a sub-path.
///
/// With `using_ssh` the clone URL takes the `git@host:org/repo.git` form.
/// SSH URLs, `file://` URLs and absolute paths pass through unchanged.
pub fn parse_git_url(source: &str, using_ssh: bool) -> Result<ParsedUrl, RepoError> {
    let source = source.trim();
    if source.starts_with("git@") || is_local_url(source) {
        return Ok(ParsedUrl::whole(source));
    }

    let (scheme, rest) = if let Some(rest) = source.strip_prefix("https://") {
        ("https", rest)
    } else if let Some(rest) = source.strip_prefix("http://") {
        ("http", rest)
    } else {
        ("https", source)
    };

    let parts: Vec<&str> = rest.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() < 3 {
        return Err(RepoError::InvalidUrl {
            url: source.to_string(),
        });
    }
    let (host, org) = (parts[0], parts[1]);
    let repo = parts[2].trim_end_matches(".git");
    if repo.is_empty() {
        return Err(RepoError::InvalidUrl {
            url: source.to_string(),
        });
    }

    let repo_url = if using_ssh {
        format!("git@{host}:{org}/{repo}.git")
    } else {
        format!("{scheme}://{host}/{org}/{repo}")
    };
    Ok(ParsedUrl {
        repo_url,
        sub_path: parts[3..].join("/"),
    })
}

/// `file://` URLs and absolute paths. libgit2's local transport cannot do
/// shallow fetches from these.
pub fn is_local_url(repo_url: &str) -> bool {
    repo_url.starts_with("file://") || Path::new(repo_url).is_absolute()
}

/// Last path component of a clone URL without `.git`, used to name dev
/// checkouts.
pub fn repo_name(repo_url: &str) -> String {
    let trimmed = repo_url.trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed)
        .trim_end_matches(".git");
    if last.is_empty() {
        "repo".to_string()
    } else {
        last.to_string()
    }
}
