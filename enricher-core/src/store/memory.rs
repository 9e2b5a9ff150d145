use std::{
    collections::{HashMap, VecDeque},
    fmt,
};

use async_trait::async_trait;
use enricher_model::{
    BatchId, Record, RecordKey, StageInfo, StageName, StageStatus,
};
use tokio::sync::{Mutex, RwLock};

use super::{ChangeFeed, RecordStore};
use crate::error::{EnricherError, Result};

/// Process-local record store with an in-memory creation outbox.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<RecordKey, Record>>,
    outbox: Mutex<VecDeque<RecordKey>>,
}

impl fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRecordStore")
            .field("records", &self.records.try_read().map(|r| r.len()).ok())
            .finish()
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, record: Record) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.key) {
            return Err(EnricherError::Conflict(format!(
                "record {} already exists",
                record.key
            )));
        }
        let key = record.key.clone();
        records.insert(key.clone(), record);
        self.outbox.lock().await.push_back(key);
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn update_stage(
        &self,
        key: &RecordKey,
        stage: StageName,
        status: StageStatus,
        info: StageInfo,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(key).ok_or_else(|| {
            EnricherError::NotFound(format!("record {key}"))
        })?;
        record.apply_stage(stage, status, info);
        Ok(())
    }

    async fn list_batch(&self, batch: &BatchId) -> Result<Vec<Record>> {
        let records = self.records.read().await;
        let mut out: Vec<Record> = records
            .values()
            .filter(|record| &record.key.batch_id == batch)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

#[async_trait]
impl ChangeFeed for InMemoryRecordStore {
    async fn poll_created(&self, limit: usize) -> Result<Vec<Record>> {
        let records = self.records.read().await;
        let outbox = self.outbox.lock().await;
        Ok(outbox
            .iter()
            .take(limit)
            .filter_map(|key| records.get(key).cloned())
            .collect())
    }

    async fn mark_published(&self, keys: &[RecordKey]) -> Result<()> {
        let mut outbox = self.outbox.lock().await;
        outbox.retain(|key| !keys.contains(key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use enricher_model::{ExecutionLog, SequenceKey, Subject};

    use super::*;

    fn record(seq: &str) -> Record {
        Record::new(
            RecordKey::new(
                BatchId::new("T1").unwrap(),
                SequenceKey::new(seq).unwrap(),
            ),
            Subject::domain("example.com").unwrap(),
            BTreeMap::new(),
        )
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = InMemoryRecordStore::new();
        store.insert(record("1")).await.unwrap();
        let err = store.insert(record("1")).await.unwrap_err();
        assert!(matches!(err, EnricherError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let store = InMemoryRecordStore::new();
        let err = store
            .update_stage(
                &record("1").key,
                StageName::Dns,
                StageStatus::Ok,
                StageInfo::empty(ExecutionLog::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EnricherError::NotFound(_)));
        assert!(store.get(&record("1").key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_stage_updates_do_not_clobber() {
        let store = std::sync::Arc::new(InMemoryRecordStore::new());
        let rec = record("1");
        let key = rec.key.clone();
        store.insert(rec).await.unwrap();

        let handles: Vec<_> = StageName::all()
            .iter()
            .map(|stage| {
                let store = store.clone();
                let key = key.clone();
                let stage = *stage;
                tokio::spawn(async move {
                    store
                        .update_stage(
                            &key,
                            stage,
                            StageStatus::Ok,
                            StageInfo::empty(ExecutionLog::default()),
                        )
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.get(&key).await.unwrap().unwrap();
        for stage in StageName::all() {
            assert_eq!(stored.status(*stage), StageStatus::Ok);
        }
    }

    #[tokio::test]
    async fn outbox_yields_each_insert_until_published() {
        let store = InMemoryRecordStore::new();
        store.insert(record("1")).await.unwrap();
        store.insert(record("2")).await.unwrap();

        let pending = store.poll_created(10).await.unwrap();
        assert_eq!(pending.len(), 2);

        store.mark_published(&[pending[0].key.clone()]).await.unwrap();
        let pending = store.poll_created(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key.sequence_key.as_str(), "2");
    }
}
