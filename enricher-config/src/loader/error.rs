use std::path::PathBuf;

use thiserror::Error;

use crate::validation::ConfigGuardRailError;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("failed to load env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("invalid duration for `{field}`: `{value}` ({source})")]
    InvalidDuration {
        field: String,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("invalid number for `{field}`: `{value}`")]
    InvalidNumber { field: String, value: String },

    #[error("invalid database URL: {source}")]
    InvalidDatabaseUrl {
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported database scheme `{scheme}`; expected postgres")]
    UnsupportedDatabaseScheme { scheme: String },

    #[error("invalid alert webhook URL: {source}")]
    InvalidWebhookUrl {
        #[source]
        source: url::ParseError,
    },

    #[error("unknown stage `{name}`")]
    UnknownStage { name: String },

    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
}
