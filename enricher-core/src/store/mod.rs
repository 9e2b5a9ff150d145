//! Durable per-identifier records.
//!
//! A stage only ever touches its own `<stage>_status` / `<stage>_info` pair,
//! through [`RecordStore::update_stage`]. Backends must apply that write as a
//! field-level update so two stages finishing at the same time never clobber
//! each other.

pub mod memory;

use async_trait::async_trait;
use enricher_model::{
    BatchId, Record, RecordKey, StageInfo, StageName, StageStatus,
};

use crate::error::Result;

pub use memory::InMemoryRecordStore;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if the key already exists.
    async fn insert(&self, record: Record) -> Result<()>;

    async fn get(&self, key: &RecordKey) -> Result<Option<Record>>;

    /// Replace exactly `stage`'s status/info pair on an existing record.
    ///
    /// Fails with `NotFound` when the record does not exist; never creates
    /// a partial record.
    async fn update_stage(
        &self,
        key: &RecordKey,
        stage: StageName,
        status: StageStatus,
        info: StageInfo,
    ) -> Result<()>;

    async fn list_batch(&self, batch: &BatchId) -> Result<Vec<Record>>;
}

/// Creation feed consumed by the change notifier.
///
/// Inserts are recorded in an outbox; the notifier polls unpublished rows
/// and marks them once routed, so every insert is observed at least once.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Oldest unpublished inserts, at most `limit` of them.
    async fn poll_created(&self, limit: usize) -> Result<Vec<Record>>;

    async fn mark_published(&self, keys: &[RecordKey]) -> Result<()>;
}
