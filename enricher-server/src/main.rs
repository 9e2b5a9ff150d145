//! # enricherd
//!
//! Runs the enrichment pipeline and the operator commands around it:
//!
//! - `run`: start the notifier, router, quota controller and one poller
//!   pool per stage; optionally seed a batch first
//! - `seed`: insert a batch of identifiers and exit
//! - `quota`: inspect or override stage intake
//! - `migrate`: apply the Postgres schema and exit

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use enricher_config::{ConfigLoad, ConfigLoader, ConfigSource};
use enricher_core::{persistence::PostgresBackend, quota::QuotaCommand};
use enricher_model::StageName;
use enricher_server::{
    commands::{
        InitialSeed, apply_quota_command, quota_status, run_pipeline, seed_file,
    },
    connect_backends,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "enricherd")]
#[command(about = "Subject enrichment pipeline with quota-aware backpressure")]
struct Cli {
    /// Config file (TOML or JSON). Overrides ENRICHER_CONFIG_PATH.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Env file to load instead of searching for `.env`
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline until interrupted (default)
    Run(RunArgs),
    /// Seed a batch of identifiers and exit
    Seed(SeedArgs),
    /// Inspect or override stage intake
    #[command(subcommand)]
    Quota(QuotaAction),
    /// Apply database migrations and exit
    Migrate,
}

#[derive(ClapArgs, Debug, Default)]
struct RunArgs {
    /// Identifier file to seed once the pipeline is running
    #[arg(long, requires = "batch")]
    seed: Option<PathBuf>,

    /// Batch id for `--seed`
    #[arg(long, requires = "seed")]
    batch: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct SeedArgs {
    /// One domain or IP address per line; `#` starts a comment line
    file: PathBuf,

    #[arg(long)]
    batch: String,
}

#[derive(Debug, Subcommand)]
enum QuotaAction {
    /// Show binding and queue depth
    Status {
        #[arg(long, value_parser = parse_stage)]
        stage: Option<StageName>,
    },
    /// Re-enable intake
    Enable {
        #[arg(long, value_parser = parse_stage)]
        stage: StageName,

        /// Also recover a stage stuck in `escalated`
        #[arg(long)]
        force: bool,
    },
    /// Pause intake
    Disable {
        #[arg(long, value_parser = parse_stage)]
        stage: StageName,
    },
}

fn parse_stage(raw: &str) -> Result<StageName, String> {
    raw.parse::<StageName>().map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli)?;

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => {
            let backends = connect_backends(&config).await?;
            let seed = match (args.seed, args.batch) {
                (Some(path), Some(batch)) => Some(InitialSeed { path, batch }),
                _ => None,
            };
            run_pipeline(&config, backends, seed).await
        }
        Command::Seed(args) => {
            let backends = connect_backends(&config).await?;
            if !backends.is_durable() {
                warn!("seeding in-memory backends; records are lost on exit");
            }
            let report = seed_file(
                backends.pipeline.store.as_ref(),
                &args.batch,
                &args.file,
            )
            .await?;
            println!(
                "batch {}: {} inserted, {} skipped",
                args.batch,
                report.inserted.len(),
                report.skipped.len()
            );
            Ok(())
        }
        Command::Quota(action) => {
            let backends = connect_backends(&config).await?;
            if !backends.is_durable() {
                warn!("quota state is process-local without a database");
            }
            let register = backends.pipeline.register.clone();
            let command = match action {
                QuotaAction::Status { stage } => {
                    let report = quota_status(
                        register.as_ref(),
                        &backends.pipeline.queues,
                        stage,
                    )
                    .await?;
                    for line in report {
                        println!("{line}");
                    }
                    return Ok(());
                }
                QuotaAction::Enable { stage, force } => {
                    QuotaCommand::Enable { stage, force }
                }
                QuotaAction::Disable { stage } => QuotaCommand::Disable { stage },
            };
            let outcome = apply_quota_command(register, command).await?;
            let binding = outcome.binding();
            println!(
                "{}: {} ({}) {:?}",
                command.stage(),
                binding.state,
                binding.phase,
                outcome
            );
            Ok(())
        }
        Command::Migrate => {
            let url = config
                .database
                .url
                .as_deref()
                .context("DATABASE_URL or database.url is required to migrate")?;
            let pg = PostgresBackend::connect(url, config.database.max_connections)
                .await
                .context("failed to connect to PostgreSQL for migration")?;
            pg.migrate().await.context("database migration failed")?;
            info!("database migrations applied successfully");
            Ok(())
        }
    }
}

fn load_runtime_config(cli: &Cli) -> anyhow::Result<enricher_config::Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &cli.env_file {
        loader = loader.with_env_file(path);
    }
    let ConfigLoad { config, warnings } =
        loader.load().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,enricher_core=info,enricher_server=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded env file");
    }
    match &config.metadata.source {
        ConfigSource::Default => info!("no config file; using defaults"),
        ConfigSource::Explicit(path) | ConfigSource::EnvPath(path) => {
            info!(path = %path.display(), "config loaded from path")
        }
        ConfigSource::EnvInline => {
            info!("config loaded from inline environment json")
        }
        ConfigSource::File(path) => {
            info!(path = %path.display(), "config loaded from file")
        }
    }
    warnings.log();

    let quota = &config.pipeline.quota;
    info!(
        quota.requeue_delay_secs = quota.requeue_delay_secs,
        quota.drain_wait_secs = quota.drain_wait_secs,
        quota.resume_at = %quota.resume_at,
        database = config.uses_postgres(),
        "configuration in effect"
    );
    Ok(config)
}
