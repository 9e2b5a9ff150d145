use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use enricher_config::Config;
use enricher_core::{
    runtime::Pipeline,
    stages::default_stages,
    worker::Stage,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{bootstrap::Backends, commands::seed::seed_file};

/// Optional batch to seed once the pipeline is up.
#[derive(Debug, Clone)]
pub struct InitialSeed {
    pub path: PathBuf,
    pub batch: String,
}

/// Keep only the stages this process is configured to run.
pub fn select_stages(
    config: &Config,
    stages: Vec<Arc<dyn Stage>>,
) -> Vec<Arc<dyn Stage>> {
    stages
        .into_iter()
        .filter(|stage| {
            let keep = config.runs(stage.name());
            if !keep {
                info!(stage = %stage.name(), "stage not selected for this process");
            }
            keep
        })
        .collect()
}

/// Run the pipeline until ctrl-c, optionally seeding a batch first.
pub async fn run_pipeline(
    config: &Config,
    backends: Backends,
    seed: Option<InitialSeed>,
) -> anyhow::Result<()> {
    let stages = default_stages(&config.pipeline.providers)
        .context("failed to build stage providers")?;
    let stages = select_stages(config, stages);
    let store = backends.pipeline.store.clone();

    let shutdown = CancellationToken::new();
    let handle = Pipeline::new(config.pipeline.clone(), backends.pipeline, stages)
        .start(shutdown.clone())
        .context("failed to start pipeline")?;
    info!(durable = backends.postgres.is_some(), "pipeline running");

    let shutdown_on_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            return;
        }
        info!("received ctrl-c, shutting down");
        shutdown_on_signal.cancel();
    });

    if let Some(seed) = seed {
        match seed_file(store.as_ref(), &seed.batch, &seed.path).await {
            Ok(report) => info!(
                batch = %seed.batch,
                inserted = report.inserted.len(),
                skipped = report.skipped.len(),
                "initial batch seeded"
            ),
            Err(err) => {
                shutdown.cancel();
                handle.join().await;
                return Err(err);
            }
        }
    }

    handle.join().await;
    info!("pipeline stopped");
    Ok(())
}
