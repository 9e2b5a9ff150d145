//! Fan-out of canonical events onto filtered subscriptions.
//!
//! Each subscription carries an attribute filter. An event is delivered to a
//! subscription only when every filtered attribute is present with one of
//! the allow-listed values; a missing attribute never matches. Deliveries
//! are independent, so one failing target does not hold back the others.

pub mod alert;
pub mod filter;

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use enricher_model::{CanonicalEvent, StageName, StageStatus};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::{
    error::Result,
    queue::StageQueue,
    quota::{ALERT_ATTRIBUTE, ESCALATION_MESSAGE, QUOTA_ALERT},
};

pub use alert::{
    AlertSink, InMemoryAlertSink, LogAlertSink, WebhookAlertSink,
};
pub use filter::FilterPolicy;

/// Where a matching event goes.
#[derive(Clone)]
pub enum SubscriptionTarget {
    Queue(Arc<dyn StageQueue>),
    Alert(Arc<dyn AlertSink>),
}

impl fmt::Debug for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTarget::Queue(queue) => {
                f.debug_tuple("Queue").field(&queue.name()).finish()
            }
            SubscriptionTarget::Alert(_) => f.write_str("Alert"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Subscription {
    pub name: String,
    pub filter: FilterPolicy,
    pub target: SubscriptionTarget,
}

impl Subscription {
    /// Stage subscription: delivers events whose `<stage>_status` is still
    /// `NotStarted`.
    pub fn for_stage(stage: StageName, queue: Arc<dyn StageQueue>) -> Self {
        Self {
            name: stage.as_str().to_string(),
            filter: FilterPolicy::new().allow(
                stage.status_attribute(),
                [StageStatus::NOT_STARTED],
            ),
            target: SubscriptionTarget::Queue(queue),
        }
    }

    /// Out-of-band escalation path for a failed intake disable.
    pub fn escalation(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            name: "quota-escalation".to_string(),
            filter: FilterPolicy::new()
                .allow(ALERT_ATTRIBUTE, [QUOTA_ALERT])
                .with_body_contains(ESCALATION_MESSAGE),
            target: SubscriptionTarget::Alert(sink),
        }
    }
}

/// Outcome of one `publish` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub matched: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl PublishReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &CanonicalEvent) -> Result<PublishReport>;
}

pub struct FanOutRouter {
    subscriptions: Vec<Subscription>,
}

impl fmt::Debug for FanOutRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutRouter")
            .field(
                "subscriptions",
                &self
                    .subscriptions
                    .iter()
                    .map(|s| s.name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl FanOutRouter {
    pub fn new(subscriptions: Vec<Subscription>) -> Self {
        Self { subscriptions }
    }

    /// One subscription per stage queue plus the escalation subscription.
    pub fn with_defaults(
        queues: &BTreeMap<StageName, Arc<dyn StageQueue>>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let mut subscriptions: Vec<Subscription> = queues
            .iter()
            .map(|(stage, queue)| Subscription::for_stage(*stage, queue.clone()))
            .collect();
        subscriptions.push(Subscription::escalation(alerts));
        Self::new(subscriptions)
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }
}

#[async_trait]
impl EventPublisher for FanOutRouter {
    async fn publish(&self, event: &CanonicalEvent) -> Result<PublishReport> {
        let body = serde_json::to_string(event)?;
        let matched: Vec<&Subscription> = self
            .subscriptions
            .iter()
            .filter(|subscription| subscription.filter.matches(event))
            .collect();

        let deliveries = matched.iter().map(|subscription| {
            let body = body.clone();
            async move {
                let outcome = match &subscription.target {
                    SubscriptionTarget::Queue(queue) => {
                        queue.send(body, Duration::ZERO).await.map(|_| ())
                    }
                    SubscriptionTarget::Alert(sink) => sink.notify(event).await,
                };
                if let Err(err) = &outcome {
                    warn!(
                        subscription = %subscription.name,
                        error = %err,
                        "delivery failed"
                    );
                }
                outcome.is_ok()
            }
        });
        let results = join_all(deliveries).await;

        let delivered = results.iter().filter(|ok| **ok).count();
        let report = PublishReport {
            matched: matched.len(),
            delivered,
            failed: results.len() - delivered,
        };
        debug!(
            matched = report.matched,
            delivered = report.delivered,
            "event published"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use enricher_model::{
        BatchId, Record, RecordKey, SequenceKey, Subject,
    };
    use uuid::Uuid;

    use super::*;
    use crate::{
        error::EnricherError,
        queue::{Delivery, InMemoryStageQueue, QueueDepth, ReceiptHandle},
    };

    struct BrokenQueue;

    #[async_trait]
    impl StageQueue for BrokenQueue {
        fn name(&self) -> &str {
            "broken"
        }

        async fn send(&self, _body: String, _delay: Duration) -> Result<Uuid> {
            Err(EnricherError::Internal("queue offline".into()))
        }

        async fn receive(
            &self,
            _max: usize,
            _visibility_timeout: Duration,
        ) -> Result<Vec<Delivery>> {
            Ok(Vec::new())
        }

        async fn delete(&self, _receipt: &ReceiptHandle) -> Result<()> {
            Ok(())
        }

        async fn depth(&self) -> Result<QueueDepth> {
            Ok(QueueDepth::default())
        }
    }

    fn new_record_event() -> CanonicalEvent {
        CanonicalEvent::from_record(&Record::new(
            RecordKey::new(
                BatchId::new("T1").unwrap(),
                SequenceKey::new("20250101000000000000").unwrap(),
            ),
            Subject::domain("example.com").unwrap(),
            Default::default(),
        ))
    }

    fn queues() -> BTreeMap<StageName, Arc<InMemoryStageQueue>> {
        StageName::all()
            .iter()
            .map(|stage| (*stage, Arc::new(InMemoryStageQueue::new(stage.as_str()))))
            .collect()
    }

    fn dyn_queues(
        queues: &BTreeMap<StageName, Arc<InMemoryStageQueue>>,
    ) -> BTreeMap<StageName, Arc<dyn StageQueue>> {
        queues
            .iter()
            .map(|(stage, queue)| (*stage, queue.clone() as Arc<dyn StageQueue>))
            .collect()
    }

    #[tokio::test]
    async fn new_record_fans_out_to_every_stage() {
        let queues = queues();
        let alerts = Arc::new(InMemoryAlertSink::new());
        let router = FanOutRouter::with_defaults(&dyn_queues(&queues), alerts.clone());

        let report = router.publish(&new_record_event()).await.unwrap();
        assert_eq!(report.delivered, StageName::all().len());
        for queue in queues.values() {
            assert_eq!(queue.depth().await.unwrap().ready, 1);
        }
        assert!(alerts.received().await.is_empty());
    }

    #[tokio::test]
    async fn missing_or_non_allowlisted_gate_is_not_delivered() {
        let queues = queues();
        let router = FanOutRouter::with_defaults(
            &dyn_queues(&queues),
            Arc::new(InMemoryAlertSink::new()),
        );

        let mut event = new_record_event();
        event.attributes.remove("dns_status");
        event.insert("whois_status", "200");
        let report = router.publish(&event).await.unwrap();

        assert_eq!(report.matched, StageName::all().len() - 2);
        assert_eq!(queues[&StageName::Dns].depth().await.unwrap().total(), 0);
        assert_eq!(queues[&StageName::Whois].depth().await.unwrap().total(), 0);
        assert_eq!(queues[&StageName::Cert].depth().await.unwrap().ready, 1);
    }

    #[tokio::test]
    async fn failing_target_does_not_block_siblings() {
        let healthy = Arc::new(InMemoryStageQueue::new("dns"));
        let router = FanOutRouter::new(vec![
            Subscription::for_stage(StageName::Whois, Arc::new(BrokenQueue)),
            Subscription::for_stage(StageName::Dns, healthy.clone()),
        ]);

        let report = router.publish(&new_record_event()).await.unwrap();
        assert_eq!(report.matched, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.is_complete());
        assert_eq!(healthy.depth().await.unwrap().ready, 1);
    }

    #[tokio::test]
    async fn escalation_reaches_alert_sink_only() {
        let queues = queues();
        let alerts = Arc::new(InMemoryAlertSink::new());
        let router = FanOutRouter::with_defaults(&dyn_queues(&queues), alerts.clone());

        let event = crate::quota::escalation_event(StageName::Reputation);
        let report = router.publish(&event).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(alerts.received().await.len(), 1);
        for queue in queues.values() {
            assert_eq!(queue.depth().await.unwrap().total(), 0);
        }

        let unrelated = CanonicalEvent::new("something else")
            .with_attribute(ALERT_ATTRIBUTE, QUOTA_ALERT);
        assert_eq!(router.publish(&unrelated).await.unwrap().matched, 0);
    }
}
