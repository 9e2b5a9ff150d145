pub mod error;
pub mod resolve;

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    models::{
        Config, ConfigMetadata,
        sources::{EnvConfig, FileConfig},
    },
    util::non_empty_var,
    validation::{self, ConfigWarnings},
};

use error::ConfigLoadError;

pub const CONFIG_PATH_ENV: &str = "ENRICHER_CONFIG_PATH";
pub const CONFIG_JSON_ENV: &str = "ENRICHER_CONFIG_JSON";

const DEFAULT_CANDIDATES: &[&str] = &[
    "enricher.toml",
    "enricher.json",
    "config/enricher.toml",
    "config/enricher.json",
];

/// Source that produced the file layer of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    /// Path passed explicitly, e.g. `enricherd --config`.
    Explicit(PathBuf),
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Resolved configuration plus the non-fatal findings of validation.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

/// Loads configuration from (in order of precedence) the environment, an
/// optional config file and the built-in defaults.
///
/// The file is looked up as:
/// 1) an explicit path from [`ConfigLoader::with_config_path`],
/// 2) `$ENRICHER_CONFIG_PATH` (TOML or JSON file),
/// 3) `$ENRICHER_CONFIG_JSON` (inline JSON),
/// 4) `enricher.toml`/`enricher.json` in `.` or `config/`,
/// 5) none, leaving every value at its default.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Load this env file instead of searching for `.env`.
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;
        let (file, source) = self.read_file_config()?;
        debug!(?source, "config file layer resolved");

        let env = EnvConfig::gather(file.providers.reputation_key_env());
        let mut config = resolve::resolve(&file, &env)?;
        config.metadata = ConfigMetadata {
            source,
            env_file_loaded,
        };

        let warnings = validation::validate(&config)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        if let Some(path) = &self.env_file {
            dotenvy::from_path(path).map_err(|source| {
                ConfigLoadError::EnvFile {
                    path: path.clone(),
                    source,
                }
            })?;
            return Ok(true);
        }

        match dotenvy::dotenv() {
            Ok(path) => {
                debug!(path = %path.display(), "loaded .env");
                Ok(true)
            }
            Err(err) if err.not_found() => Ok(false),
            Err(source) => Err(ConfigLoadError::EnvFile {
                path: PathBuf::from(".env"),
                source,
            }),
        }
    }

    fn read_file_config(
        &self,
    ) -> Result<(FileConfig, ConfigSource), ConfigLoadError> {
        if let Some(path) = &self.config_path {
            let file = load_from_file(path)?;
            return Ok((file, ConfigSource::Explicit(path.clone())));
        }

        if let Some(path) = non_empty_var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            let file = load_from_file(&path)?;
            return Ok((file, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = non_empty_var(CONFIG_JSON_ENV) {
            let file = parse_json(&raw, CONFIG_JSON_ENV)?;
            return Ok((file, ConfigSource::EnvInline));
        }

        if let Some(path) = find_default_file() {
            let file = load_from_file(&path)?;
            return Ok((file, ConfigSource::File(path)));
        }

        Ok((FileConfig::default(), ConfigSource::Default))
    }
}

pub fn load_from_file(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let origin = path.display().to_string();

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&contents, &origin),
        Some("toml") | Some("tml") => {
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                origin,
                message: err.to_string(),
            })
        }
        _ => parse_from_str(&contents, &origin),
    }
}

/// Try TOML first, then JSON.
pub fn parse_from_str(
    contents: &str,
    origin: &str,
) -> Result<FileConfig, ConfigLoadError> {
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| {
            ConfigLoadError::Parse {
                origin: origin.to_string(),
                message: format!(
                    "toml error: {toml_err}; json error: {json_err}"
                ),
            }
        })
    })
}

pub fn parse_json(raw: &str, origin: &str) -> Result<FileConfig, ConfigLoadError> {
    serde_json::from_str(raw).map_err(|err| ConfigLoadError::Parse {
        origin: origin.to_string(),
        message: err.to_string(),
    })
}

fn find_default_file() -> Option<PathBuf> {
    DEFAULT_CANDIDATES
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn toml_file_is_parsed_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enricher.toml");
        fs::write(
            &path,
            "[quota]\nrequeue_delay = \"10m\"\n\n[database]\nmax_connections = 4\n",
        )
        .unwrap();

        let file = load_from_file(&path).unwrap();
        assert_eq!(file.quota.requeue_delay.as_deref(), Some("10m"));
        assert_eq!(file.database.max_connections, Some(4));
    }

    #[test]
    fn extensionless_file_falls_back_to_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"notify":{{"webhook_url":"https://hooks.example"}}}}"#)
            .unwrap();

        let parsed = load_from_file(file.path()).unwrap();
        assert_eq!(
            parsed.notify.webhook_url.as_deref(),
            Some("https://hooks.example")
        );
    }

    #[test]
    fn unparseable_file_reports_both_formats() {
        let err = parse_from_str("{ nope", "inline").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("inline"));
        assert!(message.contains("toml error"));
        assert!(message.contains("json error"));
    }

    #[test]
    fn explicit_path_wins_and_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        fs::write(&path, r#"{"quota":{"resume_at":"01:30"}}"#).unwrap();
        let env_file = dir.path().join("empty.env");
        fs::write(&env_file, "").unwrap();

        let load = ConfigLoader::new()
            .with_config_path(&path)
            .with_env_file(&env_file)
            .load()
            .unwrap();
        assert_eq!(load.config.pipeline.quota.resume_at, "01:30");
        assert_eq!(load.config.metadata.source, ConfigSource::Explicit(path));
        assert!(load.config.metadata.env_file_loaded);
    }

    #[test]
    fn missing_explicit_path_is_an_io_error() {
        let err = ConfigLoader::new()
            .with_config_path("/nonexistent/enricher.toml")
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Io { .. }));
    }
}
