use std::{collections::BTreeSet, str::FromStr};

use enricher_core::{PipelineConfig, StageTuning};
use enricher_model::StageName;
use url::Url;

use crate::{
    ConfigLoadError,
    models::{
        Config, ContentConfig, DatabaseConfig, NotifyConfig,
        sources::{
            EnvConfig, FileConfig, FileDatabaseConfig, FileNotifyConfig,
            FileStageConfig,
        },
    },
    util::{duration_millis, duration_secs},
};

/// Merge the file layer and the environment over the built-in defaults.
/// Environment values win.
pub fn resolve(
    file: &FileConfig,
    env: &EnvConfig,
) -> Result<Config, ConfigLoadError> {
    Ok(Config {
        database: resolve_database(&file.database, env)?,
        content: ContentConfig {
            root: env
                .content_root
                .clone()
                .or_else(|| file.content.root.clone()),
        },
        pipeline: resolve_pipeline(file, env)?,
        notify: resolve_notify(&file.notify, env)?,
        run_stages: resolve_run_stages(file, env)?,
        metadata: Default::default(),
    })
}

fn resolve_database(
    file: &FileDatabaseConfig,
    env: &EnvConfig,
) -> Result<DatabaseConfig, ConfigLoadError> {
    let defaults = DatabaseConfig::default();
    let url = env.database_url.clone().or_else(|| {
        file.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    });
    if let Some(raw) = &url {
        let parsed = Url::parse(raw)
            .map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(ConfigLoadError::UnsupportedDatabaseScheme {
                scheme: parsed.scheme().to_string(),
            });
        }
    }

    let max_connections = match &env.database_max_connections {
        Some(raw) => raw.parse::<u32>().map_err(|_| {
            ConfigLoadError::InvalidNumber {
                field: "ENRICHER_DB_MAX_CONNECTIONS".into(),
                value: raw.clone(),
            }
        })?,
        None => file.max_connections.unwrap_or(defaults.max_connections),
    };

    Ok(DatabaseConfig {
        url,
        max_connections,
    })
}

fn resolve_pipeline(
    file: &FileConfig,
    env: &EnvConfig,
) -> Result<PipelineConfig, ConfigLoadError> {
    let mut pipeline = PipelineConfig::default();

    for (stage, overrides) in &file.pipeline.stages {
        let tuning = pipeline
            .stages
            .entry(*stage)
            .or_insert_with(|| StageTuning::for_stage(*stage));
        apply_stage_overrides(*stage, tuning, overrides)?;
    }

    if let Some(limit) = file.pipeline.notifier_fetch_limit {
        pipeline.notifier_fetch_limit = limit;
    }
    if let Some(raw) = &file.pipeline.notifier_poll_interval {
        pipeline.notifier_poll_interval_ms =
            duration_millis("pipeline.notifier_poll_interval", raw)?;
    }

    let quota = &file.quota;
    if let Some(raw) = &quota.requeue_delay {
        pipeline.quota.requeue_delay_secs =
            duration_secs("quota.requeue_delay", raw)?;
    }
    if let Some(raw) = &quota.drain_wait {
        pipeline.quota.drain_wait_secs = duration_secs("quota.drain_wait", raw)?;
    }
    if let Some(resume_at) = &quota.resume_at {
        pipeline.quota.resume_at = resume_at.trim().to_string();
    }

    let providers = &file.providers;
    let settings = &mut pipeline.providers;
    if let Some(raw) = &providers.request_timeout {
        settings.request_timeout_secs =
            duration_secs("providers.request_timeout", raw)?;
    }
    for (target, value) in [
        (&mut settings.user_agent, &providers.user_agent),
        (&mut settings.rdap_base, &providers.rdap_base),
        (&mut settings.crtsh_base, &providers.crtsh_base),
        (&mut settings.reputation_base, &providers.reputation_base),
        (&mut settings.archive_base, &providers.archive_base),
    ] {
        if let Some(value) = value {
            *target = value.trim().to_string();
        }
    }
    settings.reputation_api_key = env.reputation_api_key.clone();

    Ok(pipeline)
}

fn apply_stage_overrides(
    stage: StageName,
    tuning: &mut StageTuning,
    overrides: &FileStageConfig,
) -> Result<(), ConfigLoadError> {
    let field = |name: &str| format!("pipeline.stages.{stage}.{name}");

    if let Some(batch_size) = overrides.batch_size {
        tuning.batch_size = batch_size;
    }
    if let Some(concurrency) = overrides.concurrency {
        tuning.concurrency = concurrency;
    }
    if let Some(attempts) = overrides.attempts {
        tuning.attempts = attempts;
    }
    if let Some(raw) = &overrides.visibility_timeout {
        tuning.visibility_timeout_secs =
            duration_secs(&field("visibility_timeout"), raw)?;
    }
    if let Some(raw) = &overrides.processing_timeout {
        tuning.processing_timeout_secs =
            duration_secs(&field("processing_timeout"), raw)?;
    }
    if let Some(raw) = &overrides.poll_interval {
        tuning.poll_interval_ms = duration_millis(&field("poll_interval"), raw)?;
    }
    if let Some(raw) = &overrides.retry_delay {
        tuning.retry_delay_ms = duration_millis(&field("retry_delay"), raw)?;
    }
    Ok(())
}

fn resolve_notify(
    file: &FileNotifyConfig,
    env: &EnvConfig,
) -> Result<NotifyConfig, ConfigLoadError> {
    let raw = env.alert_webhook.clone().or_else(|| {
        file.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    });
    let webhook_url = raw
        .map(|raw| Url::parse(&raw))
        .transpose()
        .map_err(|source| ConfigLoadError::InvalidWebhookUrl { source })?;
    Ok(NotifyConfig { webhook_url })
}

fn resolve_run_stages(
    file: &FileConfig,
    env: &EnvConfig,
) -> Result<Option<BTreeSet<StageName>>, ConfigLoadError> {
    if let Some(names) = &env.run_stages {
        let stages = names
            .iter()
            .map(|name| {
                StageName::from_str(name).map_err(|_| {
                    ConfigLoadError::UnknownStage { name: name.clone() }
                })
            })
            .collect::<Result<BTreeSet<_>, _>>()?;
        return Ok(Some(stages));
    }
    Ok(file
        .pipeline
        .run_stages
        .as_ref()
        .map(|stages| stages.iter().copied().collect()))
}
