use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use enricher_model::{
    BatchId, Record, RecordKey, SequenceKey, StageInfo, StageName, StageSlot,
    StageStatus, Subject,
};
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use tracing::debug;

use crate::{
    error::{EnricherError, Result},
    store::{ChangeFeed, RecordStore},
};

const RECORD_COLUMNS: &str =
    "batch_id, sequence_key, subject, metadata, stages, created_at";

/// Records table with a `published_at` column acting as the creation
/// outbox.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresRecordStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_record(row: &PgRow) -> Result<Record> {
    let batch_id: String = row.try_get("batch_id")?;
    let sequence_key: String = row.try_get("sequence_key")?;
    let Json(subject): Json<Subject> = row.try_get("subject")?;
    let Json(metadata): Json<BTreeMap<String, String>> =
        row.try_get("metadata")?;
    let Json(stages): Json<BTreeMap<StageName, StageSlot>> =
        row.try_get("stages")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(Record {
        key: RecordKey::new(
            BatchId::new(batch_id)?,
            SequenceKey::new(sequence_key)?,
        ),
        subject,
        metadata,
        stages,
        created_at,
    })
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn insert(&self, record: Record) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO enrichment_records
                (batch_id, sequence_key, subject, metadata, stages, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (batch_id, sequence_key) DO NOTHING
            "#,
        )
        .bind(record.key.batch_id.as_str())
        .bind(record.key.sequence_key.as_str())
        .bind(Json(&record.subject))
        .bind(Json(&record.metadata))
        .bind(Json(&record.stages))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EnricherError::Conflict(format!(
                "record {} already exists",
                record.key
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM enrichment_records \
             WHERE batch_id = $1 AND sequence_key = $2"
        ))
        .bind(key.batch_id.as_str())
        .bind(key.sequence_key.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_record).transpose()
    }

    async fn update_stage(
        &self,
        key: &RecordKey,
        stage: StageName,
        status: StageStatus,
        info: StageInfo,
    ) -> Result<()> {
        let slot = StageSlot {
            status,
            info: Some(info),
        };
        // Merging one key keeps concurrent writes from sibling stages.
        let result = sqlx::query(
            r#"
            UPDATE enrichment_records
            SET stages = stages || jsonb_build_object($3::text, $4::jsonb)
            WHERE batch_id = $1 AND sequence_key = $2
            "#,
        )
        .bind(key.batch_id.as_str())
        .bind(key.sequence_key.as_str())
        .bind(stage.as_str())
        .bind(Json(&slot))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EnricherError::NotFound(format!("record {key}")));
        }
        debug!(record = %key, %stage, status = %slot.status, "stage written");
        Ok(())
    }

    async fn list_batch(&self, batch: &BatchId) -> Result<Vec<Record>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM enrichment_records \
             WHERE batch_id = $1 ORDER BY sequence_key"
        ))
        .bind(batch.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_record).collect()
    }
}

#[async_trait]
impl ChangeFeed for PostgresRecordStore {
    async fn poll_created(&self, limit: usize) -> Result<Vec<Record>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM enrichment_records \
             WHERE published_at IS NULL \
             ORDER BY created_at, batch_id, sequence_key \
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_record).collect()
    }

    async fn mark_published(&self, keys: &[RecordKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let batches: Vec<String> = keys
            .iter()
            .map(|key| key.batch_id.as_str().to_string())
            .collect();
        let sequences: Vec<String> = keys
            .iter()
            .map(|key| key.sequence_key.as_str().to_string())
            .collect();
        sqlx::query(
            r#"
            UPDATE enrichment_records r
            SET published_at = NOW()
            FROM UNNEST($1::text[], $2::text[]) AS k(batch_id, sequence_key)
            WHERE r.batch_id = k.batch_id
              AND r.sequence_key = k.sequence_key
              AND r.published_at IS NULL
            "#,
        )
        .bind(&batches)
        .bind(&sequences)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
