//! Pipeline wiring: backends, router, notifier, controller and one poller
//! pool per stage.

pub mod pool;

use std::{collections::BTreeMap, fmt, sync::Arc};

use enricher_model::StageName;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::PipelineConfig,
    content::{ContentStore, InMemoryContentStore},
    error::Result,
    notifier::ChangeNotifier,
    queue::{InMemoryStageQueue, StageQueue},
    quota::{
        BackpressureProtocol, DailySchedule, EnablementRegister,
        InMemoryEnablementRegister, QuotaController, QuotaHandle,
        spawn_daily_resume,
    },
    router::{AlertSink, FanOutRouter, LogAlertSink},
    store::{ChangeFeed, InMemoryRecordStore, RecordStore},
    worker::{RetryPolicy, Stage, StageWorker},
};

pub use pool::spawn_stage_pool;

/// Stages whose provider enforces a quota and that therefore run behind
/// the backpressure protocol and the daily resume.
pub const RATE_LIMITED_STAGES: &[StageName] = &[StageName::Reputation];

const CONTROLLER_MAILBOX: usize = 64;

/// Storage and delivery backends the pipeline runs on.
#[derive(Clone)]
pub struct PipelineBackends {
    pub store: Arc<dyn RecordStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub content: Arc<dyn ContentStore>,
    pub register: Arc<dyn EnablementRegister>,
    /// One queue per stage, including stages without a worker here.
    pub queues: BTreeMap<StageName, Arc<dyn StageQueue>>,
    pub alerts: Arc<dyn AlertSink>,
}

impl fmt::Debug for PipelineBackends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBackends")
            .field(
                "queues",
                &self.queues.values().map(|q| q.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PipelineBackends {
    /// Everything in process memory; alerts go to the log.
    pub fn in_memory() -> Self {
        let records = Arc::new(InMemoryRecordStore::new());
        Self {
            store: records.clone(),
            feed: records,
            content: Arc::new(InMemoryContentStore::new()),
            register: Arc::new(InMemoryEnablementRegister::new()),
            queues: in_memory_queues(),
            alerts: Arc::new(LogAlertSink),
        }
    }

    pub fn with_content(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = content;
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }
}

pub fn in_memory_queues() -> BTreeMap<StageName, Arc<dyn StageQueue>> {
    StageName::all()
        .iter()
        .map(|stage| {
            let queue: Arc<dyn StageQueue> =
                Arc::new(InMemoryStageQueue::new(stage.as_str()));
            (*stage, queue)
        })
        .collect()
}

pub struct Pipeline {
    config: PipelineConfig,
    backends: PipelineBackends,
    stages: Vec<Arc<dyn Stage>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("backends", &self.backends)
            .finish()
    }
}

/// Running pipeline. Cancel the token passed to [`Pipeline::start`] and
/// then [`join`](Self::join) to shut down.
pub struct PipelineHandle {
    router: Arc<FanOutRouter>,
    quota: QuotaHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl PipelineHandle {
    pub fn router(&self) -> &Arc<FanOutRouter> {
        &self.router
    }

    pub fn quota(&self) -> &QuotaHandle {
        &self.quota
    }

    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "pipeline task ended abnormally");
            }
        }
    }
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        backends: PipelineBackends,
        stages: Vec<Arc<dyn Stage>>,
    ) -> Self {
        Self {
            config,
            backends,
            stages,
        }
    }

    pub fn backends(&self) -> &PipelineBackends {
        &self.backends
    }

    /// Spawn every long-running task.
    pub fn start(self, shutdown: CancellationToken) -> Result<PipelineHandle> {
        let Pipeline {
            config,
            backends,
            stages,
        } = self;
        let schedule = DailySchedule::parse(&config.quota.resume_at)?;

        let router = Arc::new(FanOutRouter::with_defaults(
            &backends.queues,
            backends.alerts.clone(),
        ));
        let mut tasks = Vec::new();

        let (quota, controller_task) =
            QuotaController::new(backends.register.clone())
                .with_escalation(router.clone())
                .spawn(CONTROLLER_MAILBOX, shutdown.clone());
        tasks.push(controller_task);

        let control = Arc::new(quota.clone());
        let protocol = Arc::new(BackpressureProtocol::new(
            backends.register.clone(),
            control.clone(),
            router.clone(),
            config.quota.clone(),
        ));
        tasks.push(spawn_daily_resume(
            schedule,
            RATE_LIMITED_STAGES.to_vec(),
            control,
            shutdown.clone(),
        ));

        let notifier = ChangeNotifier::new(
            backends.feed.clone(),
            router.clone(),
            config.notifier_fetch_limit,
            config.notifier_poll_interval(),
        );
        tasks.push(notifier.spawn(shutdown.clone()));

        for stage in stages {
            let name = stage.name();
            let Some(queue) = backends.queues.get(&name).cloned() else {
                warn!(stage = %name, "no queue configured; stage not started");
                continue;
            };
            let tuning = config.tuning(name);
            let guarded = RATE_LIMITED_STAGES.contains(&name);

            let base = StageWorker::new(
                stage,
                backends.store.clone(),
                backends.content.clone(),
                queue,
                RetryPolicy::from(&tuning),
            );
            let base = if guarded {
                base.with_quota_guard(protocol.clone())
            } else {
                base
            };

            info!(
                stage = %name,
                concurrency = tuning.concurrency,
                batch_size = tuning.batch_size,
                quota_guarded = guarded,
                "starting stage pool"
            );
            tasks.extend(spawn_stage_pool(
                base,
                tuning,
                backends.register.clone(),
                shutdown.clone(),
            ));
        }

        Ok(PipelineHandle {
            router,
            quota,
            tasks,
        })
    }
}
