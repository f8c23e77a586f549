//! Domain types for sync entries and their run status.
//!
//! Metadata is operator-controlled; [`SyncJobStatus`] is rewritten by every
//! sync run. All types round-trip through serde so the file store can persist
//! them as YAML.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a sync entry, e.g. `cl_syn_0190f3…`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncId(pub String);

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SyncId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SyncId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Path of a deployed application, optionally qualified by a domain.
///
/// Displays as `domain:path`, or just `path` when no domain is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppPathDomain {
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
}

impl AppPathDomain {
    pub fn new(path: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for AppPathDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            self.path.fmt(f)
        } else {
            write!(f, "{}:{}", self.domain, self.path)
        }
    }
}

impl From<&str> for AppPathDomain {
    fn from(s: &str) -> Self {
        match s.split_once(':') {
            Some((domain, path)) => Self::new(path, domain),
            None => Self::new(s, ""),
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which applications an apply reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReloadOption {
    None,
    #[default]
    Updated,
    Matched,
}

impl fmt::Display for ReloadOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadOption::None => write!(f, "none"),
            ReloadOption::Updated => write!(f, "updated"),
            ReloadOption::Matched => write!(f, "matched"),
        }
    }
}

/// Coarse health of a sync entry. Observational only: scheduling is gated
/// on the failure count, and manual runs are allowed in every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncState {
    #[default]
    Enabled,
    Failing,
    Disabled,
}

impl SyncState {
    /// State after a failed run that brought the failure count to `failure_count`.
    pub fn after_failure(failure_count: u32, max_failures: u32) -> Self {
        if failure_count >= max_failures {
            SyncState::Disabled
        } else {
            SyncState::Failing
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Enabled => write!(f, "Enabled"),
            SyncState::Failing => write!(f, "Failing"),
            SyncState::Disabled => write!(f, "Disabled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Apply / reload results
// ---------------------------------------------------------------------------

/// Outcome of an approval audit for one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApproveResult {
    pub app_path_domain: AppPathDomain,
    #[serde(default)]
    pub new_loads: Vec<String>,
    #[serde(default)]
    pub approved_loads: Vec<String>,
    pub needs_approval: bool,
}

/// Result snapshot of one apply, stored in the entry status after each run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApplyResponse {
    pub dry_run: bool,
    pub commit_id: String,
    /// Set when the definitions were unchanged at the last run's commit.
    pub skipped_apply: bool,
    pub create_results: Vec<AppPathDomain>,
    pub update_results: Vec<AppPathDomain>,
    pub approve_results: Vec<ApproveResult>,
    pub promote_results: Vec<AppPathDomain>,
    pub reload_results: Vec<AppPathDomain>,
    pub skipped_results: Vec<AppPathDomain>,
    /// Applications matched by the apply file; the next run's reload set.
    pub filtered_apps: Vec<AppPathDomain>,
}

/// Result of reloading a single application from its own source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReloadResult {
    pub dry_run: bool,
    pub reload_results: Vec<AppPathDomain>,
    pub approve_result: Option<ApproveResult>,
    pub promote_results: Vec<AppPathDomain>,
    pub skipped_results: Vec<AppPathDomain>,
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// The persisted record of a deployed application, as far as sync needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEntry {
    pub id: String,
    pub path: AppPathDomain,
    pub source_url: String,
    #[serde(default)]
    pub is_dev: bool,
    #[serde(default)]
    pub git_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_auth_name: Option<String>,
}

/// Operator-controlled policy of a sync entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    #[serde(default)]
    pub approve: bool,
    #[serde(default)]
    pub promote: bool,
    #[serde(default)]
    pub reload: ReloadOption,
    #[serde(default = "default_branch")]
    pub git_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_auth: Option<String>,
    #[serde(default)]
    pub clobber: bool,
    #[serde(default)]
    pub force_reload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    /// Derived on read. The store drops it before writing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Minutes between scheduled runs; non-positive disables scheduling.
    #[serde(default)]
    pub schedule_frequency: i64,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for SyncMetadata {
    fn default() -> Self {
        Self {
            approve: false,
            promote: false,
            reload: ReloadOption::default(),
            git_branch: default_branch(),
            git_auth: None,
            clobber: false,
            force_reload: false,
            webhook_secret: None,
            webhook_url: None,
            schedule_frequency: 0,
        }
    }
}

/// Status written back by every sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_apply: bool,
    #[serde(default)]
    pub state: SyncState,
    /// Commit of the last successful apply.
    #[serde(default)]
    pub commit_id: String,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub apply_response: ApplyResponse,
}

/// A synchronization target: a path of app definitions plus policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntry {
    pub id: SyncId,
    /// Source of the apply file, e.g. `github.com/org/apps/prod.star`.
    pub path: String,
    pub is_scheduled: bool,
    #[serde(default)]
    pub user_id: String,
    pub metadata: SyncMetadata,
    #[serde(default)]
    pub status: SyncJobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCreateResponse {
    pub dry_run: bool,
    pub id: SyncId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(rename = "schedule_minutes")]
    pub schedule_frequency: i64,
    pub sync_job_status: SyncJobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDeleteResponse {
    pub dry_run: bool,
    pub id: SyncId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncListResponse {
    pub entries: Vec<SyncEntry>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
