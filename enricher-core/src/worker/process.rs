use std::{fmt, sync::Arc, time::Duration};

use enricher_model::{
    ExecutionLog, RecordKey, StageDetails, StageInfo, StageName, StageStatus,
    Subject,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Artifact, RetryPolicy, Stage, StageError, StageLookup,
    classify::{FailureSignature, classify_failure},
};
use crate::{
    content::{ContentKey, ContentStore},
    queue::{Delivery, StageQueue},
    quota::{BackpressureOutcome, BackpressureProtocol},
    store::RecordStore,
};

/// What happened to one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Status written and message acknowledged.
    Written(StageStatus),
    /// Sent back with the requeue delay; no status written.
    Requeued,
    /// Left in flight; it reappears once its visibility timeout lapses.
    Released,
    /// Undecodable or missing identity/subject; deleted without a write.
    Discarded,
}

type AttemptResult = Result<(StageDetails, Vec<String>), StageError>;

/// How the remainder of a batch is handled once the quota protocol kicks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Requeue,
    Release,
}

#[derive(Clone)]
pub struct StageWorker {
    stage: Arc<dyn Stage>,
    store: Arc<dyn RecordStore>,
    content: Arc<dyn ContentStore>,
    queue: Arc<dyn StageQueue>,
    retry: RetryPolicy,
    quota: Option<Arc<BackpressureProtocol>>,
    worker_id: String,
}

impl fmt::Debug for StageWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageWorker")
            .field("stage", &self.stage.name())
            .field("queue", &self.queue.name())
            .field("retry", &self.retry)
            .field("quota_guarded", &self.quota.is_some())
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

impl StageWorker {
    pub fn new(
        stage: Arc<dyn Stage>,
        store: Arc<dyn RecordStore>,
        content: Arc<dyn ContentStore>,
        queue: Arc<dyn StageQueue>,
        retry: RetryPolicy,
    ) -> Self {
        let worker_id = format!("{}-{}", stage.name(), std::process::id());
        Self {
            stage,
            store,
            content,
            queue,
            retry,
            quota: None,
            worker_id,
        }
    }

    /// Route provider quota rejections through the backpressure protocol
    /// instead of writing a rate-limited status.
    pub fn with_quota_guard(
        mut self,
        protocol: Arc<BackpressureProtocol>,
    ) -> Self {
        self.quota = Some(protocol);
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn stage_name(&self) -> StageName {
        self.stage.name()
    }

    pub fn queue(&self) -> &Arc<dyn StageQueue> {
        &self.queue
    }

    /// Process one received batch. Outcomes are returned in delivery order.
    ///
    /// Once the quota protocol fires, the rest of the batch is not looked
    /// up: it is requeued with the same delay, or released when the
    /// protocol escalated.
    pub async fn process_batch(
        &self,
        deliveries: Vec<Delivery>,
    ) -> Vec<MessageOutcome> {
        let mut outcomes = Vec::with_capacity(deliveries.len());
        let mut halt = None;
        for delivery in &deliveries {
            let outcome = match halt {
                Some(Halt::Requeue) => self.requeue(delivery).await,
                Some(Halt::Release) => MessageOutcome::Released,
                None => {
                    let (outcome, next) = self.process_one(delivery).await;
                    halt = next;
                    outcome
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn process_one(
        &self,
        delivery: &Delivery,
    ) -> (MessageOutcome, Option<Halt>) {
        let stage = self.stage.name();
        let (key, subject) = match decode(delivery) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(
                    stage = %stage,
                    message = %delivery.message_id,
                    error = %err,
                    "discarding malformed message"
                );
                self.acknowledge(delivery).await;
                return (MessageOutcome::Discarded, None);
            }
        };

        let started = Instant::now();
        let execution_id = Uuid::now_v7();

        if !self.stage.supports(&subject) {
            debug!(
                stage = %stage,
                record = %key,
                subject = %subject,
                "unsupported subject"
            );
            let info = StageInfo::empty(self.log(execution_id, started, 0));
            let outcome = self
                .finish(delivery, &key, StageStatus::ClientRejected, info)
                .await;
            return (outcome, None);
        }

        let (result, attempts) = self.run_attempts(&key, &subject).await;
        let log = self.log(execution_id, started, attempts);

        match result {
            Ok((details, artifacts)) => {
                let info = StageInfo {
                    details,
                    artifacts,
                    log,
                };
                info!(
                    stage = %stage,
                    record = %key,
                    subject = %subject,
                    "lookup succeeded"
                );
                let outcome =
                    self.finish(delivery, &key, StageStatus::Ok, info).await;
                (outcome, None)
            }
            Err(err) => {
                let signature = classify_failure(&err);
                if signature == FailureSignature::RateLimited
                    && let Some(protocol) = &self.quota
                {
                    return match protocol.on_rate_limited(stage).await {
                        BackpressureOutcome::Requeue { .. } => {
                            (self.requeue(delivery).await, Some(Halt::Requeue))
                        }
                        BackpressureOutcome::Escalated => {
                            (MessageOutcome::Released, Some(Halt::Release))
                        }
                    };
                }
                let status = signature
                    .status()
                    .unwrap_or(StageStatus::RateLimited);
                info!(
                    stage = %stage,
                    record = %key,
                    subject = %subject,
                    attempts,
                    status = %status,
                    error = %err,
                    "lookup failed"
                );
                let info = StageInfo::empty(log);
                (self.finish(delivery, &key, status, info).await, None)
            }
        }
    }

    /// Bounded retry loop. Returns the final result and the attempt count.
    async fn run_attempts(
        &self,
        key: &RecordKey,
        subject: &Subject,
    ) -> (AttemptResult, u32) {
        let stage = self.stage.name();
        let mut attempt = 0;
        loop {
            attempt += 1;
            if !self.retry.pacing.is_zero() {
                tokio::time::sleep(self.retry.pacing).await;
            }
            let outcome = match self.stage.lookup(subject).await {
                Ok(StageLookup { details, artifacts }) => self
                    .persist(key, artifacts)
                    .await
                    .map(|locations| (details, locations))
                    .map_err(StageError::from),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(done) => return (Ok(done), attempt),
                Err(err) => {
                    let retryable = classify_failure(&err).is_retryable();
                    if !retryable || attempt >= self.retry.attempts {
                        return (Err(err), attempt);
                    }
                    debug!(
                        stage = %stage,
                        record = %key,
                        attempt,
                        of = self.retry.attempts,
                        error = %err,
                        "attempt failed; retrying"
                    );
                }
            }
        }
    }

    async fn persist(
        &self,
        key: &RecordKey,
        artifacts: Vec<Artifact>,
    ) -> crate::error::Result<Vec<String>> {
        let mut locations = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let content_key = ContentKey::new(
                key,
                self.stage.name(),
                &artifact.slug_source,
                artifact.extension,
            );
            self.content.put(&content_key, &artifact.bytes).await?;
            locations.push(content_key.to_string());
        }
        Ok(locations)
    }

    fn log(
        &self,
        execution_id: Uuid,
        started: Instant,
        attempts: u32,
    ) -> ExecutionLog {
        ExecutionLog {
            duration_secs: started.elapsed().as_secs(),
            execution_id: execution_id.to_string(),
            worker_id: self.worker_id.clone(),
            attempts,
        }
    }

    /// Write the stage's pair, then acknowledge. A failed write leaves the
    /// message in flight for redelivery.
    async fn finish(
        &self,
        delivery: &Delivery,
        key: &RecordKey,
        status: StageStatus,
        info: StageInfo,
    ) -> MessageOutcome {
        let stage = self.stage.name();
        if let Err(err) = self
            .store
            .update_stage(key, stage, status.clone(), info)
            .await
        {
            warn!(
                stage = %stage,
                record = %key,
                error = %err,
                "status write failed; leaving message for redelivery"
            );
            return MessageOutcome::Released;
        }
        self.acknowledge(delivery).await;
        MessageOutcome::Written(status)
    }

    async fn acknowledge(&self, delivery: &Delivery) {
        if let Err(err) = self.queue.delete(&delivery.receipt).await {
            warn!(
                stage = %self.stage.name(),
                message = %delivery.message_id,
                error = %err,
                "acknowledge failed; message may be redelivered"
            );
        }
    }

    fn requeue_delay(&self) -> Duration {
        self.quota
            .as_ref()
            .map(|protocol| protocol.settings().requeue_delay())
            .unwrap_or_default()
    }

    /// Send a delayed copy, then drop the original. If the copy cannot be
    /// sent the original is left for redelivery.
    async fn requeue(&self, delivery: &Delivery) -> MessageOutcome {
        let stage = self.stage.name();
        match self
            .queue
            .send(delivery.body.clone(), self.requeue_delay())
            .await
        {
            Ok(copy) => {
                debug!(
                    stage = %stage,
                    message = %delivery.message_id,
                    copy = %copy,
                    "requeued for later"
                );
                self.acknowledge(delivery).await;
                MessageOutcome::Requeued
            }
            Err(err) => {
                warn!(
                    stage = %stage,
                    message = %delivery.message_id,
                    error = %err,
                    "requeue failed; releasing"
                );
                MessageOutcome::Released
            }
        }
    }
}

fn decode(delivery: &Delivery) -> crate::error::Result<(RecordKey, Subject)> {
    let event = delivery.event()?;
    Ok((event.record_key()?, event.subject()?))
}
