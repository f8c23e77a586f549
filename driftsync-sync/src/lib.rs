//! Sync orchestration: per-entry run state machine and the scheduled pass.
//!
//! - [`orchestrator`]: [`SyncOrchestrator`] entry operations and sync jobs
//! - [`scheduler`]: due-entry selection and [`TickSummary`]
//! - [`collaborators`]: apply / reload / completion interfaces
//! - [`ids`]: sync ids and webhook secrets

pub mod collaborators;
pub mod error;
pub mod ids;
pub mod orchestrator;
pub mod scheduler;

pub use collaborators::{
    Applier, ApplyOutcome, ApplyRequest, CollaboratorError, CommitCompleter, ReloadRequest,
    Reloader, TransactionCompleter,
};
pub use error::SyncError;
pub use orchestrator::{JobOutcome, SyncOrchestrator};
pub use scheduler::{is_due, TickSummary};
