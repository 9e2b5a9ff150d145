use std::{fmt, time::Duration};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::trace;
use uuid::Uuid;

use super::interval_secs;
use crate::{
    error::{EnricherError, Result},
    queue::{Delivery, QueueDepth, ReceiptHandle, StageQueue},
};

/// One named queue in the shared `stage_messages` table.
///
/// Receives claim rows with `FOR UPDATE SKIP LOCKED`, push `visible_at`
/// forward by the visibility timeout and stamp a fresh receipt, so
/// concurrent pollers never see the same message while it is hidden.
#[derive(Clone)]
pub struct PostgresStageQueue {
    pool: PgPool,
    name: String,
}

impl fmt::Debug for PostgresStageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStageQueue")
            .field("name", &self.name)
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresStageQueue {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }
}

#[async_trait]
impl StageQueue for PostgresStageQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String, delay: Duration) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO stage_messages (id, queue, body, visible_at)
            VALUES ($1, $2, $3, NOW() + make_interval(secs => $4))
            "#,
        )
        .bind(id)
        .bind(&self.name)
        .bind(body)
        .bind(interval_secs(delay))
        .execute(&self.pool)
        .await?;
        trace!(queue = %self.name, message = %id, ?delay, "message sent");
        Ok(id)
    }

    async fn receive(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Delivery>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            WITH picked AS (
                SELECT id
                FROM stage_messages
                WHERE queue = $1
                  AND visible_at <= NOW()
                ORDER BY visible_at, created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE stage_messages m
            SET receipt = gen_random_uuid(),
                visible_at = NOW() + make_interval(secs => $3),
                receive_count = m.receive_count + 1
            FROM picked
            WHERE m.id = picked.id
            RETURNING m.id, m.body, m.receipt, m.receive_count
            "#,
        )
        .bind(&self.name)
        .bind(i64::try_from(max).unwrap_or(i64::MAX))
        .bind(interval_secs(visibility_timeout))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<Delivery> {
                let receive_count: i32 = row.try_get("receive_count")?;
                Ok(Delivery {
                    receipt: ReceiptHandle::from_uuid(row.try_get("receipt")?),
                    message_id: row.try_get("id")?,
                    body: row.try_get("body")?,
                    receive_count: u32::try_from(receive_count).unwrap_or(0),
                })
            })
            .collect()
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM stage_messages WHERE queue = $1 AND receipt = $2",
        )
        .bind(&self.name)
        .bind(receipt.as_uuid())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EnricherError::NotFound(format!(
                "receipt {receipt} on queue {}",
                self.name
            )));
        }
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE visible_at <= NOW()) AS ready,
                COUNT(*) FILTER (
                    WHERE visible_at > NOW() AND receipt IS NOT NULL
                ) AS in_flight,
                COUNT(*) FILTER (
                    WHERE visible_at > NOW() AND receipt IS NULL
                ) AS delayed
            FROM stage_messages
            WHERE queue = $1
            "#,
        )
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await?;

        let count = |column: &str| -> Result<usize> {
            let value: i64 = row.try_get(column)?;
            Ok(usize::try_from(value).unwrap_or(0))
        };
        Ok(QueueDepth {
            ready: count("ready")?,
            in_flight: count("in_flight")?,
            delayed: count("delayed")?,
        })
    }
}
