pub mod sources;

use std::{collections::BTreeSet, fmt, path::PathBuf};

use enricher_core::PipelineConfig;
use enricher_model::StageName;
use url::Url;

use crate::loader::ConfigSource;

/// Fully resolved configuration for one `enricherd` process.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub content: ContentConfig,
    pub pipeline: PipelineConfig,
    pub notify: NotifyConfig,
    /// Stages this process runs workers for. `None` runs every stage.
    pub run_stages: Option<BTreeSet<StageName>>,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn runs(&self, stage: StageName) -> bool {
        self.run_stages
            .as_ref()
            .is_none_or(|stages| stages.contains(&stage))
    }

    pub fn uses_postgres(&self) -> bool {
        self.database.url.is_some()
    }
}

#[derive(Clone)]
pub struct DatabaseConfig {
    /// Postgres URL; without one every backend is in-memory.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self
            .url
            .as_deref()
            .and_then(|raw| Url::parse(raw).ok())
            .and_then(|url| url.host_str().map(str::to_string));
        f.debug_struct("DatabaseConfig")
            .field("configured", &self.url.is_some())
            .field("host", &host)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentConfig {
    /// `cacache` root for artifacts. `None` keeps artifacts in memory.
    pub root: Option<PathBuf>,
}

impl ContentConfig {
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        match &self.root {
            Some(root) => std::fs::create_dir_all(root),
            None => Ok(()),
        }
    }
}

/// Where escalation alerts go.
#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    /// Webhook receiving escalations as JSON. Alerts are logged otherwise.
    pub webhook_url: Option<Url>,
}

#[derive(Debug, Clone)]
pub struct ConfigMetadata {
    pub source: ConfigSource,
    pub env_file_loaded: bool,
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        Self {
            source: ConfigSource::Default,
            env_file_loaded: false,
        }
    }
}
