#![cfg(feature = "postgres")]

mod common;

use std::time::Duration;

use anyhow::Result;
use enricher_core::{
    error::EnricherError,
    persistence::PostgresBackend,
    queue::StageQueue,
    quota::{EnablementRegister, EnablementState, QuotaPhase},
    store::{ChangeFeed, RecordStore},
};
use enricher_model::{
    ExecutionLog, StageDetails, StageInfo, StageName, StageStatus,
};
use sqlx::PgPool;

use common::record;

fn info() -> StageInfo {
    StageInfo::empty(ExecutionLog {
        attempts: 1,
        ..ExecutionLog::default()
    })
}

#[sqlx::test(migrator = "enricher_core::persistence::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn stage_updates_merge_without_clobbering(pool: PgPool) -> Result<()> {
    let store = PostgresBackend::from_pool(pool).records();
    let seeded = record(common::SEQUENCE, "example.com");
    store.insert(seeded.clone()).await?;

    let conflict = store.insert(seeded.clone()).await.unwrap_err();
    assert!(matches!(conflict, EnricherError::Conflict(_)));

    let (dns, whois) = tokio::join!(
        store.update_stage(&seeded.key, StageName::Dns, StageStatus::Ok, info()),
        store.update_stage(
            &seeded.key,
            StageName::Whois,
            StageStatus::NotFound,
            info()
        ),
    );
    dns?;
    whois?;

    let stored = store.get(&seeded.key).await?.expect("record inserted");
    assert_eq!(stored.subject, seeded.subject);
    assert_eq!(stored.status(StageName::Dns), StageStatus::Ok);
    assert_eq!(stored.status(StageName::Whois), StageStatus::NotFound);
    assert_eq!(stored.status(StageName::Cert), StageStatus::NotStarted);
    assert_eq!(
        stored.info(StageName::Dns).map(|info| &info.details),
        Some(&StageDetails::Empty)
    );

    let missing = record("20250101000000000099", "example.org");
    let err = store
        .update_stage(&missing.key, StageName::Dns, StageStatus::Ok, info())
        .await
        .unwrap_err();
    assert!(matches!(err, EnricherError::NotFound(_)));
    assert!(store.get(&missing.key).await?.is_none());
    Ok(())
}

#[sqlx::test(migrator = "enricher_core::persistence::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn outbox_yields_until_marked(pool: PgPool) -> Result<()> {
    let store = PostgresBackend::from_pool(pool).records();
    store
        .insert(record("20250101000000000001", "example.com"))
        .await?;
    store.insert(record("20250101000000000002", "10.0.0.1")).await?;

    let pending = store.poll_created(10).await?;
    assert_eq!(pending.len(), 2);
    store.mark_published(&[pending[0].key.clone()]).await?;

    let pending = store.poll_created(10).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key.sequence_key.as_str(), "20250101000000000002");
    Ok(())
}

#[sqlx::test(migrator = "enricher_core::persistence::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn queue_hides_received_messages(pool: PgPool) -> Result<()> {
    let backend = PostgresBackend::from_pool(pool);
    let queue = backend.queue("dns");
    let other = backend.queue("whois");
    queue.send("a".into(), Duration::ZERO).await?;
    queue.send("b".into(), Duration::from_secs(3600)).await?;

    let first = queue.receive(10, Duration::from_secs(300)).await?;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].body, "a");
    assert_eq!(first[0].receive_count, 1);
    assert!(queue.receive(10, Duration::from_secs(300)).await?.is_empty());
    assert!(other.receive(10, Duration::from_secs(300)).await?.is_empty());

    let depth = queue.depth().await?;
    assert_eq!((depth.ready, depth.in_flight, depth.delayed), (0, 1, 1));

    queue.delete(&first[0].receipt).await?;
    let stale = queue.delete(&first[0].receipt).await.unwrap_err();
    assert!(matches!(stale, EnricherError::NotFound(_)));
    Ok(())
}

#[sqlx::test(migrator = "enricher_core::persistence::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn drain_transition_is_compare_and_set(pool: PgPool) -> Result<()> {
    let register = PostgresBackend::from_pool(pool).register();
    let vt = StageName::Reputation;

    assert!(register.binding(vt).await?.is_enabled());
    let (a, b) = tokio::join!(
        register.try_begin_drain(vt),
        register.try_begin_drain(vt)
    );
    assert_eq!([a?, b?].iter().filter(|won| **won).count(), 1);
    assert_eq!(register.binding(vt).await?.phase, QuotaPhase::Draining);

    register
        .set_binding(vt, EnablementState::Disabled, QuotaPhase::Paused)
        .await?;
    assert!(!register.try_begin_drain(vt).await?);

    let escalated = register.mark_escalated(vt).await?;
    assert_eq!(escalated.state, EnablementState::Disabled);
    assert_eq!(escalated.phase, QuotaPhase::Escalated);
    Ok(())
}
