//! driftsync core library: domain types, configuration, metadata store.
//!
//! Public API surface:
//! - [`types`]: sync entries, status snapshots, apply/reload result shapes
//! - [`config`]: [`SystemConfig`] loading
//! - [`paths`]: on-disk layout under `~/.driftsync/`
//! - [`store`]: the [`MetadataStore`] / [`Transaction`] contract
//! - [`file_store`]: YAML-backed reference store
//! - [`error`]: [`StoreError`]

pub mod config;
pub mod error;
pub mod file_store;
pub mod paths;
pub mod store;
pub mod types;

pub use config::{GitAuthEntry, SystemConfig};
pub use error::StoreError;
pub use file_store::{FileStore, FileTransaction};
pub use store::{MetadataStore, Transaction};
pub use types::{
    AppEntry, AppPathDomain, ApplyResponse, ApproveResult, ReloadOption, ReloadResult,
    SyncCreateResponse, SyncDeleteResponse, SyncEntry, SyncId, SyncJobStatus, SyncListResponse,
    SyncMetadata, SyncState,
};
