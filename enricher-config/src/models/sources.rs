use std::{collections::BTreeMap, path::PathBuf};

use enricher_model::StageName;
use serde::{Deserialize, Serialize};

use crate::util::{non_empty_var, parse_csv_var};

/// Env var naming the reputation API key when the file does not override it.
pub const DEFAULT_REPUTATION_KEY_ENV: &str = "VT_API_KEY";

/// Raw configuration as defined in a TOML or JSON file. Durations are
/// humantime strings and stay unparsed until resolution.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub content: FileContentConfig,
    #[serde(default)]
    pub pipeline: FilePipelineConfig,
    #[serde(default)]
    pub quota: FileQuotaConfig,
    #[serde(default)]
    pub providers: FileProviderConfig,
    #[serde(default)]
    pub notify: FileNotifyConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileContentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePipelineConfig {
    /// Stages this process runs workers for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_stages: Option<Vec<StageName>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifier_fetch_limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifier_poll_interval: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stages: BTreeMap<StageName, FileStageConfig>,
}

/// Per-stage overrides; unset fields keep the stage's built-in tuning.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileQuotaConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeue_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drain_wait: Option<String>,
    /// Daily UTC resume time, `HH:MM`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_at: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rdap_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crtsh_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reputation_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_base: Option<String>,
    /// Name of the env var holding the reputation API key. The key itself
    /// never lives in the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reputation_api_key_env: Option<String>,
}

impl FileProviderConfig {
    pub fn reputation_key_env(&self) -> &str {
        self.reputation_api_key_env
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_REPUTATION_KEY_ENV)
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileNotifyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Environment-derived configuration values. Anything set here wins over
/// the file.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub database_url: Option<String>,
    pub database_max_connections: Option<String>,
    pub content_root: Option<PathBuf>,
    pub alert_webhook: Option<String>,
    pub reputation_api_key: Option<String>,
    pub run_stages: Option<Vec<String>>,
}

impl EnvConfig {
    /// Snapshot the process environment. `reputation_key_env` names the
    /// variable holding the reputation API key.
    pub fn gather(reputation_key_env: &str) -> Self {
        Self {
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: non_empty_var(
                "ENRICHER_DB_MAX_CONNECTIONS",
            ),
            content_root: non_empty_var("ENRICHER_CONTENT_ROOT")
                .map(PathBuf::from),
            alert_webhook: non_empty_var("ENRICHER_ALERT_WEBHOOK"),
            reputation_api_key: non_empty_var(reputation_key_env),
            run_stages: parse_csv_var("ENRICHER_STAGES"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_sections_are_keyed_by_wire_name() {
        let raw = r#"
            [pipeline]
            run_stages = ["dns", "vt"]

            [pipeline.stages.vt]
            batch_size = 60
            retry_delay = "2s"

            [pipeline.stages.hist]
            concurrency = 4
        "#;
        let file: FileConfig = toml::from_str(raw).unwrap();
        assert_eq!(
            file.pipeline.run_stages,
            Some(vec![StageName::Dns, StageName::Reputation])
        );
        let vt = &file.pipeline.stages[&StageName::Reputation];
        assert_eq!(vt.batch_size, Some(60));
        assert_eq!(vt.retry_delay.as_deref(), Some("2s"));
        assert_eq!(
            file.pipeline.stages[&StageName::Archive].concurrency,
            Some(4)
        );
    }

    #[test]
    fn unknown_stage_section_is_rejected() {
        let raw = "[pipeline.stages.nope]\nbatch_size = 1\n";
        assert!(toml::from_str::<FileConfig>(raw).is_err());
    }

    #[test]
    fn reputation_key_env_defaults() {
        let mut providers = FileProviderConfig::default();
        assert_eq!(providers.reputation_key_env(), "VT_API_KEY");
        providers.reputation_api_key_env = Some("MY_VT_KEY".into());
        assert_eq!(providers.reputation_key_env(), "MY_VT_KEY");
    }
}
