use std::{collections::BTreeMap, sync::Arc};

use anyhow::Context;
use enricher_config::Config;
use enricher_core::{
    content::{
        CacacheContentStore, ContentRoot, ContentStore, InMemoryContentStore,
    },
    persistence::PostgresBackend,
    queue::StageQueue,
    router::{AlertSink, LogAlertSink, WebhookAlertSink},
    runtime::PipelineBackends,
    stages::http_client,
};
use enricher_model::StageName;
use tracing::{info, warn};

/// Backends selected for this process.
#[derive(Debug, Clone)]
pub struct Backends {
    pub pipeline: PipelineBackends,
    pub postgres: Option<PostgresBackend>,
}

impl Backends {
    /// State survives the process only with a database.
    pub fn is_durable(&self) -> bool {
        self.postgres.is_some()
    }
}

/// Connect the configured backends. With a database URL every store,
/// queue and the register live in Postgres (migrated on connect);
/// otherwise everything is in process memory.
pub async fn connect_backends(config: &Config) -> anyhow::Result<Backends> {
    let content = content_store(config)?;
    let alerts = alert_sink(config)?;

    let Some(url) = config.database.url.as_deref() else {
        warn!("no database configured; running with in-memory backends");
        let pipeline = PipelineBackends::in_memory()
            .with_content(content)
            .with_alerts(alerts);
        return Ok(Backends {
            pipeline,
            postgres: None,
        });
    };

    let postgres = PostgresBackend::connect(url, config.database.max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    postgres
        .migrate()
        .await
        .context("database migration failed")?;

    let records = Arc::new(postgres.records());
    let queues: BTreeMap<StageName, Arc<dyn StageQueue>> = StageName::all()
        .iter()
        .map(|stage| {
            let queue: Arc<dyn StageQueue> =
                Arc::new(postgres.queue(stage.as_str()));
            (*stage, queue)
        })
        .collect();
    let pipeline = PipelineBackends {
        store: records.clone(),
        feed: records,
        content,
        register: Arc::new(postgres.register()),
        queues,
        alerts,
    };
    info!(?postgres, "postgres backends ready");
    Ok(Backends {
        pipeline,
        postgres: Some(postgres),
    })
}

pub fn content_store(config: &Config) -> anyhow::Result<Arc<dyn ContentStore>> {
    match &config.content.root {
        Some(root) => {
            config.content.ensure_directories().with_context(|| {
                format!("failed to create content root {}", root.display())
            })?;
            info!(root = %root.display(), "artifacts stored on disk");
            Ok(Arc::new(CacacheContentStore::new(ContentRoot::new(
                root.clone(),
            ))))
        }
        None => {
            warn!("no content root configured; artifacts kept in memory");
            Ok(Arc::new(InMemoryContentStore::new()))
        }
    }
}

pub fn alert_sink(config: &Config) -> anyhow::Result<Arc<dyn AlertSink>> {
    match &config.notify.webhook_url {
        Some(url) => {
            let client = http_client(&config.pipeline.providers)
                .context("failed to build alert HTTP client")?;
            info!(host = url.host_str().unwrap_or("-"), "alerts sent to webhook");
            Ok(Arc::new(WebhookAlertSink::new(client, url.clone())))
        }
        None => Ok(Arc::new(LogAlertSink)),
    }
}
