use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use enricher_model::StageName;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    error::{EnricherError, Result},
    quota::{EnablementRegister, EnablementState, QueueBinding, QuotaPhase},
};

#[derive(Clone)]
pub struct PostgresEnablementRegister {
    pool: PgPool,
}

impl fmt::Debug for PostgresEnablementRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresEnablementRegister")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresEnablementRegister {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_binding(row: &PgRow) -> Result<QueueBinding> {
    let state: String = row.try_get("state")?;
    let phase: String = row.try_get("phase")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(QueueBinding {
        state: EnablementState::parse(&state).ok_or_else(|| {
            EnricherError::Internal(format!("invalid enablement state {state}"))
        })?,
        phase: QuotaPhase::parse(&phase).ok_or_else(|| {
            EnricherError::Internal(format!("invalid quota phase {phase}"))
        })?,
        updated_at,
    })
}

#[async_trait]
impl EnablementRegister for PostgresEnablementRegister {
    async fn binding(&self, stage: StageName) -> Result<QueueBinding> {
        let row = sqlx::query(
            "SELECT state, phase, updated_at FROM quota_bindings \
             WHERE stage = $1",
        )
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => decode_binding(&row),
            None => Ok(QueueBinding::flowing()),
        }
    }

    async fn try_begin_drain(&self, stage: StageName) -> Result<bool> {
        // The conditional upsert is the compare-and-set: only a row still
        // enabled/flowing is moved, and only one transaction can move it.
        let row = sqlx::query(
            r#"
            INSERT INTO quota_bindings (stage, state, phase, updated_at)
            VALUES ($1, 'enabled', 'draining', NOW())
            ON CONFLICT (stage) DO UPDATE
            SET phase = 'draining', updated_at = NOW()
            WHERE quota_bindings.state = 'enabled'
              AND quota_bindings.phase = 'flowing'
            RETURNING stage
            "#,
        )
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn set_binding(
        &self,
        stage: StageName,
        state: EnablementState,
        phase: QuotaPhase,
    ) -> Result<QueueBinding> {
        let row = sqlx::query(
            r#"
            INSERT INTO quota_bindings (stage, state, phase, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (stage) DO UPDATE
            SET state = EXCLUDED.state,
                phase = EXCLUDED.phase,
                updated_at = EXCLUDED.updated_at
            RETURNING state, phase, updated_at
            "#,
        )
        .bind(stage.as_str())
        .bind(state.as_str())
        .bind(phase.as_str())
        .fetch_one(&self.pool)
        .await?;
        decode_binding(&row)
    }

    async fn mark_escalated(&self, stage: StageName) -> Result<QueueBinding> {
        let row = sqlx::query(
            r#"
            INSERT INTO quota_bindings (stage, state, phase, updated_at)
            VALUES ($1, 'enabled', 'escalated', NOW())
            ON CONFLICT (stage) DO UPDATE
            SET phase = 'escalated', updated_at = NOW()
            RETURNING state, phase, updated_at
            "#,
        )
        .bind(stage.as_str())
        .fetch_one(&self.pool)
        .await?;
        decode_binding(&row)
    }
}
