use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    config::StageTuning,
    quota::EnablementRegister,
    worker::{MessageOutcome, StageWorker},
};

/// Per-batch counts, logged after every processed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub written: usize,
    pub requeued: usize,
    pub released: usize,
    pub discarded: usize,
}

impl BatchSummary {
    pub fn tally(outcomes: &[MessageOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut acc, outcome| {
            match outcome {
                MessageOutcome::Written(_) => acc.written += 1,
                MessageOutcome::Requeued => acc.requeued += 1,
                MessageOutcome::Released => acc.released += 1,
                MessageOutcome::Discarded => acc.discarded += 1,
            }
            acc
        })
    }
}

/// Spawn `tuning.concurrency` pollers for one stage.
///
/// Each poller only receives while the stage's binding is enabled. A
/// batch that overruns the processing timeout is abandoned; its
/// unacknowledged messages come back when their visibility lapses.
pub fn spawn_stage_pool(
    worker: StageWorker,
    tuning: StageTuning,
    register: Arc<dyn EnablementRegister>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let stage = worker.stage_name();
    let worker_group = format!("{}-{}", stage, std::process::id());

    (0..tuning.concurrency.max(1))
        .map(|i| {
            let worker_id = format!("{worker_group}-w{i}");
            let worker = worker.clone().with_worker_id(worker_id.clone());
            let register = Arc::clone(&register);
            let shutdown = shutdown.clone();

            tokio::spawn(async move {
                loop {
                    if shutdown.is_cancelled() {
                        debug!(worker = %worker_id, "poller shutting down");
                        break;
                    }

                    match register.is_enabled(stage).await {
                        Ok(true) => {}
                        Ok(false) => {
                            trace!(worker = %worker_id, "stage disabled; idling");
                            idle(&shutdown, tuning).await;
                            continue;
                        }
                        Err(err) => {
                            warn!(
                                worker = %worker_id,
                                error = %err,
                                "enablement lookup failed"
                            );
                            idle(&shutdown, tuning).await;
                            continue;
                        }
                    }

                    let deliveries = match worker
                        .queue()
                        .receive(tuning.batch_size, tuning.visibility_timeout())
                        .await
                    {
                        Ok(deliveries) if deliveries.is_empty() => {
                            idle(&shutdown, tuning).await;
                            continue;
                        }
                        Ok(deliveries) => deliveries,
                        Err(err) => {
                            warn!(
                                worker = %worker_id,
                                error = %err,
                                "receive failed"
                            );
                            idle(&shutdown, tuning).await;
                            continue;
                        }
                    };

                    let received = deliveries.len();
                    match tokio::time::timeout(
                        tuning.processing_timeout(),
                        worker.process_batch(deliveries),
                    )
                    .await
                    {
                        Ok(outcomes) => {
                            let summary = BatchSummary::tally(&outcomes);
                            info!(
                                stage = %stage,
                                worker = %worker_id,
                                received,
                                written = summary.written,
                                requeued = summary.requeued,
                                released = summary.released,
                                discarded = summary.discarded,
                                "batch processed"
                            );
                        }
                        Err(_) => warn!(
                            stage = %stage,
                            worker = %worker_id,
                            received,
                            timeout = ?tuning.processing_timeout(),
                            "batch exceeded processing timeout"
                        ),
                    }
                }
                info!(worker = %worker_id, "stage poller stopped");
            })
        })
        .collect()
}

async fn idle(shutdown: &CancellationToken, tuning: StageTuning) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(tuning.poll_interval()) => {}
    }
}

#[cfg(test)]
mod tests {
    use enricher_model::StageStatus;

    use super::*;

    #[test]
    fn tally_counts_each_outcome() {
        let summary = BatchSummary::tally(&[
            MessageOutcome::Written(StageStatus::Ok),
            MessageOutcome::Written(StageStatus::NotFound),
            MessageOutcome::Requeued,
            MessageOutcome::Discarded,
        ]);
        assert_eq!(
            summary,
            BatchSummary {
                written: 2,
                requeued: 1,
                released: 0,
                discarded: 1,
            }
        );
    }
}
