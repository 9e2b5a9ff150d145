//! Postgres-backed record store, stage queues and enablement register.

pub mod queue;
pub mod records;
pub mod register;

use std::{fmt, time::Duration};

use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

use crate::error::{EnricherError, Result};

pub use queue::PostgresStageQueue;
pub use records::PostgresRecordStore;
pub use register::PostgresEnablementRegister;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connection pool plus the repositories built on it.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    max_connections: u32,
}

impl fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl PostgresBackend {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(url)
            .await
            .map_err(|e| {
                EnricherError::Internal(format!(
                    "Database connection failed: {e}"
                ))
            })?;
        info!(max_connections, "database pool initialized");
        Ok(Self {
            pool,
            max_connections,
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        let max_connections = pool.options().get_max_connections();
        Self {
            pool,
            max_connections,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| {
                EnricherError::Internal(format!("Migration failed: {e}"))
            })?;
        info!("database migrations applied");
        Ok(())
    }

    pub fn records(&self) -> PostgresRecordStore {
        PostgresRecordStore::new(self.pool.clone())
    }

    pub fn queue(&self, name: impl Into<String>) -> PostgresStageQueue {
        PostgresStageQueue::new(self.pool.clone(), name)
    }

    pub fn register(&self) -> PostgresEnablementRegister {
        PostgresEnablementRegister::new(self.pool.clone())
    }
}

/// Seconds as the `double precision` argument of `make_interval`.
pub(crate) fn interval_secs(duration: Duration) -> f64 {
    duration.as_secs_f64()
}
