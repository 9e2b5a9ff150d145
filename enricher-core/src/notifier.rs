//! Change notifier: turns record inserts into canonical events.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use enricher_model::{CanonicalEvent, RecordKey};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{error::Result, router::EventPublisher, store::ChangeFeed};

/// Publishing attempts before an event with a permanently failing
/// subscription is marked published anyway.
const MAX_PUBLISH_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierTick {
    pub published: usize,
    /// Left in the feed for another attempt.
    pub deferred: usize,
}

/// Polls the creation feed and emits exactly one canonical event per
/// insert. Delivery is at-least-once: an event is marked published only
/// after every matching subscription accepted it.
pub struct ChangeNotifier {
    feed: Arc<dyn ChangeFeed>,
    publisher: Arc<dyn EventPublisher>,
    fetch_limit: usize,
    poll_interval: Duration,
    failures: Mutex<HashMap<RecordKey, u32>>,
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("fetch_limit", &self.fetch_limit)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl ChangeNotifier {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        publisher: Arc<dyn EventPublisher>,
        fetch_limit: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            feed,
            publisher,
            fetch_limit: fetch_limit.max(1),
            poll_interval,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Publish one page of pending inserts.
    pub async fn tick(&self) -> Result<NotifierTick> {
        let records = self.feed.poll_created(self.fetch_limit).await?;
        let mut done = Vec::with_capacity(records.len());
        let mut tick = NotifierTick::default();
        let mut failures = self.failures.lock().await;

        for record in records {
            let event = CanonicalEvent::from_record(&record);
            let complete = match self.publisher.publish(&event).await {
                Ok(report) => report.is_complete(),
                Err(err) => {
                    warn!(record = %record.key, error = %err, "publish failed");
                    false
                }
            };
            if complete {
                failures.remove(&record.key);
                done.push(record.key);
                tick.published += 1;
                continue;
            }

            let attempts = failures.entry(record.key.clone()).or_insert(0);
            *attempts += 1;
            if *attempts >= MAX_PUBLISH_ATTEMPTS {
                error!(
                    record = %record.key,
                    attempts = *attempts,
                    "giving up on incomplete fan-out"
                );
                failures.remove(&record.key);
                done.push(record.key);
                tick.published += 1;
            } else {
                tick.deferred += 1;
            }
        }

        if !done.is_empty() {
            self.feed.mark_published(&done).await?;
        }
        Ok(tick)
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    info!("change notifier shutting down");
                    break;
                }
                let idle = match self.tick().await {
                    Ok(tick) => {
                        if tick.published > 0 {
                            debug!(
                                published = tick.published,
                                deferred = tick.deferred,
                                "notifier tick"
                            );
                        }
                        tick.published == 0
                    }
                    Err(err) => {
                        warn!(error = %err, "change feed poll failed");
                        true
                    }
                };
                if idle {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use enricher_model::{BatchId, Record, SequenceKey, Subject};

    use super::*;
    use crate::{
        error::EnricherError,
        router::PublishReport,
        store::{InMemoryRecordStore, RecordStore},
    };

    #[derive(Default)]
    struct CountingPublisher {
        events: Mutex<Vec<CanonicalEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl EventPublisher for CountingPublisher {
        async fn publish(
            &self,
            event: &CanonicalEvent,
        ) -> Result<PublishReport> {
            self.events.lock().await.push(event.clone());
            if self.fail {
                return Err(EnricherError::Internal("down".into()));
            }
            Ok(PublishReport {
                matched: 1,
                delivered: 1,
                failed: 0,
            })
        }
    }

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
    async fn one_event_per_insert() {
        let store = Arc::new(InMemoryRecordStore::new());
        let publisher = Arc::new(CountingPublisher::default());
        let notifier = ChangeNotifier::new(
            store.clone(),
            publisher.clone(),
            10,
            Duration::from_millis(1),
        );
        store.insert(record("1")).await.unwrap();
        store.insert(record("2")).await.unwrap();

        let tick = notifier.tick().await.unwrap();
        assert_eq!(tick.published, 2);
        let again = notifier.tick().await.unwrap();
        assert_eq!(again, NotifierTick::default());
        assert_eq!(publisher.events.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_publish_is_retried_then_abandoned() {
        let store = Arc::new(InMemoryRecordStore::new());
        let publisher = Arc::new(CountingPublisher {
            fail: true,
            ..Default::default()
        });
        let notifier = ChangeNotifier::new(
            store.clone(),
            publisher.clone(),
            10,
            Duration::from_millis(1),
        );
        store.insert(record("1")).await.unwrap();

        for _ in 0..MAX_PUBLISH_ATTEMPTS - 1 {
            assert_eq!(notifier.tick().await.unwrap().deferred, 1);
        }
        assert_eq!(notifier.tick().await.unwrap().published, 1);
        assert!(store.poll_created(10).await.unwrap().is_empty());
        assert_eq!(
            publisher.events.lock().await.len(),
            MAX_PUBLISH_ATTEMPTS as usize
        );
    }
}
