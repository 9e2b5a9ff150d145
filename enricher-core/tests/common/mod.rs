#![allow(dead_code)]

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use enricher_core::{
    content::InMemoryContentStore,
    queue::{Delivery, InMemoryStageQueue, StageQueue},
    router::{EventPublisher, FanOutRouter, Subscription},
    store::{InMemoryRecordStore, RecordStore},
    worker::{
        Artifact, RetryPolicy, Stage, StageError, StageLookup, StageWorker,
    },
};
use enricher_model::{
    BatchId, CanonicalEvent, DnsDetails, Record, RecordKey, SequenceKey,
    StageDetails, StageName, Subject,
};

pub const BATCH: &str = "T1";
pub const SEQUENCE: &str = "20250101000000000000";
/// Longer than the drain wait, as with the real reputation tuning.
pub const VISIBILITY: Duration = Duration::from_secs(120);

pub fn key(sequence: &str) -> RecordKey {
    RecordKey::new(
        BatchId::new(BATCH).unwrap(),
        SequenceKey::new(sequence).unwrap(),
    )
}

pub fn record(sequence: &str, identifier: &str) -> Record {
    Record::new(
        key(sequence),
        Subject::classify(identifier).unwrap(),
        BTreeMap::new(),
    )
}

pub fn dns_success(hostname: &str) -> StageLookup {
    StageLookup {
        details: StageDetails::Dns(DnsDetails {
            hostname: hostname.to_string(),
            aliases: Vec::new(),
            addresses: vec!["93.184.216.34".to_string()],
            nameservers: Vec::new(),
        }),
        artifacts: vec![Artifact {
            slug_source: hostname.to_string(),
            extension: "json",
            bytes: br#"{"addresses":["93.184.216.34"]}"#.to_vec(),
        }],
    }
}

/// Stage whose lookups replay a fixed script, one entry per call. Calls
/// past the end of the script repeat the last entry.
pub struct ScriptedStage {
    name: StageName,
    domain_only: bool,
    script: Mutex<VecDeque<Result<StageLookup, StageError>>>,
    last: Mutex<Option<Result<StageLookup, StageError>>>,
    calls: AtomicU32,
}

impl ScriptedStage {
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            domain_only: false,
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    pub fn domain_only(mut self) -> Self {
        self.domain_only = true;
        self
    }

    pub fn then(self, response: Result<StageLookup, StageError>) -> Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> StageName {
        self.name
    }

    fn supports(&self, subject: &Subject) -> bool {
        !self.domain_only || subject.is_domain()
    }

    async fn lookup(
        &self,
        _subject: &Subject,
    ) -> Result<StageLookup, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(StageError::Other("empty script".into()))),
        }
    }
}

/// One stage wired to in-memory backends.
pub struct Harness {
    pub store: Arc<InMemoryRecordStore>,
    pub content: Arc<InMemoryContentStore>,
    pub queue: Arc<InMemoryStageQueue>,
    pub router: FanOutRouter,
    pub stage: Arc<ScriptedStage>,
}

impl Harness {
    pub fn new(stage: ScriptedStage) -> Self {
        let queue = Arc::new(InMemoryStageQueue::new(stage.name().as_str()));
        let router = FanOutRouter::new(vec![Subscription::for_stage(
            stage.name(),
            queue.clone(),
        )]);
        Self {
            store: Arc::new(InMemoryRecordStore::new()),
            content: Arc::new(InMemoryContentStore::new()),
            queue,
            router,
            stage: Arc::new(stage),
        }
    }

    pub fn worker(&self, retry: RetryPolicy) -> StageWorker {
        StageWorker::new(
            self.stage.clone(),
            self.store.clone(),
            self.content.clone(),
            self.queue.clone(),
            retry,
        )
    }

    /// Insert `record` and route its creation event.
    pub async fn seed(&self, record: Record) {
        let event = CanonicalEvent::from_record(&record);
        self.store.insert(record).await.unwrap();
        let report = self.router.publish(&event).await.unwrap();
        assert!(report.is_complete());
    }

    pub async fn receive(&self, max: usize) -> Vec<Delivery> {
        self.queue.receive(max, VISIBILITY).await.unwrap()
    }
}

pub fn no_pacing(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::ZERO)
}
