mod common;

use std::{sync::Arc, time::Duration};

use enricher_core::{
    config::PipelineConfig,
    producer::seed_identifiers,
    runtime::{Pipeline, PipelineBackends},
    store::RecordStore,
    worker::{Stage, StageError},
};
use enricher_model::{BatchId, Record, StageName, StageStatus};
use tokio_util::sync::CancellationToken;

use common::{ScriptedStage, dns_success};

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    for tuning in config.stages.values_mut() {
        tuning.concurrency = 2;
        tuning.poll_interval_ms = 10;
        tuning.retry_delay_ms = 0;
    }
    config.notifier_poll_interval_ms = 10;
    config
}

async fn wait_for_batch(
    store: &dyn RecordStore,
    batch: &BatchId,
    done: impl Fn(&Record) -> bool,
) -> Vec<Record> {
    for _ in 0..500 {
        let records = store.list_batch(batch).await.unwrap();
        if !records.is_empty() && records.iter().all(&done) {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("batch {batch} did not settle");
}

#[tokio::test(start_paused = true)]
async fn inserted_records_flow_through_every_running_stage() {
    let backends = PipelineBackends::in_memory();
    let store = backends.store.clone();
    let dns = Arc::new(
        ScriptedStage::new(StageName::Dns)
            .domain_only()
            .then(Ok(dns_success("example.com"))),
    );
    let whois =
        Arc::new(ScriptedStage::new(StageName::Whois).then(Err(StageError::NotFound)));
    let stages: Vec<Arc<dyn Stage>> = vec![dns.clone(), whois.clone()];

    let shutdown = CancellationToken::new();
    let handle = Pipeline::new(fast_config(), backends, stages)
        .start(shutdown.clone())
        .unwrap();

    let batch = BatchId::new("T1").unwrap();
    let report = seed_identifiers(
        store.as_ref(),
        &batch,
        ["example.com", "10.0.0.1"],
    )
    .await
    .unwrap();
    assert_eq!(report.inserted.len(), 2);

    let records = wait_for_batch(store.as_ref(), &batch, |record| {
        record.status(StageName::Dns).is_terminal()
            && record.status(StageName::Whois).is_terminal()
    })
    .await;

    let domain = &records[0];
    assert_eq!(domain.status(StageName::Dns), StageStatus::Ok);
    assert_eq!(domain.status(StageName::Whois), StageStatus::NotFound);
    let address = &records[1];
    assert_eq!(address.status(StageName::Dns), StageStatus::ClientRejected);
    assert_eq!(address.status(StageName::Whois), StageStatus::NotFound);

    // Stages without a worker keep their routed messages queued.
    for record in &records {
        assert_eq!(
            record.status(StageName::Screenshot),
            StageStatus::NotStarted
        );
    }
    assert_eq!(dns.calls(), 1);
    assert_eq!(whois.calls(), 2);

    shutdown.cancel();
    handle.join().await;
}
