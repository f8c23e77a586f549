//! Scheduled sync pass.
//!
//! One call is one tick: a single listing transaction, a single repository
//! cache shared by every due entry, entries run one after another. A failing
//! entry does not stop the tick; failing to list entries does.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use driftsync_core::{MetadataStore, SyncEntry};

use crate::error::SyncError;
use crate::orchestrator::SyncOrchestrator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub ran: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Whether the scheduler should run `entry` at `now`.
pub fn is_due(entry: &SyncEntry, now: DateTime<Utc>, max_failures: u32) -> bool {
    let frequency = entry.metadata.schedule_frequency;
    if !entry.is_scheduled || frequency <= 0 {
        return false;
    }
    if let Some(last) = entry.status.last_execution_time {
        if last + Duration::minutes(frequency) > now {
            return false;
        }
    }
    entry.status.failure_count < max_failures
}

impl<S: MetadataStore> SyncOrchestrator<S> {
    pub fn run_scheduled_syncs(&self, now: DateTime<Utc>) -> Result<TickSummary, SyncError> {
        let tx = self.store.begin_transaction()?;
        let mut cache = self.repo_caches.open();
        let entries = self.store.get_sync_entries(&tx)?;
        let max_failures = self.config.max_sync_failure_count;

        let mut summary = TickSummary::default();
        for entry in &entries {
            if !is_due(entry, now, max_failures) {
                tracing::trace!(entry = %entry.id, "sync job not due");
                summary.skipped += 1;
                continue;
            }
            match self.run_sync_job(None, entry, false, true, Some(&mut cache)) {
                Ok(outcome) if outcome.status.error.is_none() => summary.ran += 1,
                Ok(_) => summary.failed += 1,
                Err(err) => {
                    tracing::error!(entry = %entry.id, error = %err, "error running sync job");
                    summary.failed += 1;
                }
            }
        }

        tracing::debug!(ran = summary.ran, skipped = summary.skipped, failed = summary.failed, "sync tick done");
        Ok(summary)
    }
}
