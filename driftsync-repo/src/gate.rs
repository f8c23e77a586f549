//! Fixed-capacity admission gate for clones.
//!
//! Shared across every [`RepoCache`](crate::cache::RepoCache) of a process so
//! that the scheduler and ad-hoc runs together never exceed
//! `max_concurrent_clones`. Callers block; a caller that waits longer than
//! `max_wait` gets [`RepoError::CloneGateTimeout`].
//!
//! Clones run on blocking threads and hold the slot across synchronous
//! libgit2 calls, so the gate is a `Mutex` + `Condvar` rather than an async
//! semaphore.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::error::RepoError;

#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    max_wait: Duration,
    in_use: Mutex<usize>,
    freed: Condvar,
}

/// A held slot; released on drop.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<AdmissionGate>,
}

impl AdmissionGate {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, max_wait: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            max_wait,
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        *self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquire(self: &Arc<Self>) -> Result<GatePermit, RepoError> {
        let in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut in_use, _) = self
            .freed
            .wait_timeout_while(in_use, self.max_wait, |n| *n >= self.capacity)
            .unwrap_or_else(PoisonError::into_inner);
        if *in_use >= self.capacity {
            tracing::warn!(
                capacity = self.capacity,
                waited_secs = self.max_wait.as_secs(),
                "clone gate timed out",
            );
            return Err(RepoError::CloneGateTimeout {
                waited: self.max_wait,
            });
        }
        *in_use += 1;
        Ok(GatePermit { gate: self.clone() })
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let mut in_use = self
            .gate
            .in_use
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *in_use = in_use.saturating_sub(1);
        self.gate.freed.notify_one();
    }
}
