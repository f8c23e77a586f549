//! Metadata store contract consumed by the sync orchestrator.
//!
//! A transaction that is dropped without [`Transaction::commit`] discards its
//! writes. Reads through a transaction observe that transaction's own
//! uncommitted writes.

use crate::error::StoreError;
use crate::types::{AppEntry, AppPathDomain, SyncEntry, SyncId, SyncJobStatus};

pub trait Transaction: Send + 'static {
    /// Make all staged writes durable. The transaction stays usable and
    /// starts over empty.
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discard all staged writes. The transaction stays usable and starts
    /// over empty.
    fn rollback(&mut self);
}

pub trait MetadataStore: Send + Sync + 'static {
    type Tx: Transaction;

    fn begin_transaction(&self) -> Result<Self::Tx, StoreError>;

    /// Fails with [`StoreError::SyncExists`] if the id is taken.
    fn create_sync(&self, tx: &mut Self::Tx, entry: &SyncEntry) -> Result<(), StoreError>;

    fn get_sync_entry(&self, tx: &Self::Tx, id: &SyncId) -> Result<SyncEntry, StoreError>;

    /// All entries, ordered by id.
    fn get_sync_entries(&self, tx: &Self::Tx) -> Result<Vec<SyncEntry>, StoreError>;

    fn update_sync_status(
        &self,
        tx: &mut Self::Tx,
        id: &SyncId,
        status: &SyncJobStatus,
    ) -> Result<(), StoreError>;

    fn delete_sync(&self, tx: &mut Self::Tx, id: &SyncId) -> Result<(), StoreError>;

    fn get_app(&self, tx: &Self::Tx, path: &AppPathDomain) -> Result<AppEntry, StoreError>;
}
