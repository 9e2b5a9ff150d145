//! Shared configuration library for the enricher pipeline.
//!
//! Configuration comes from an optional TOML or JSON file layered under
//! environment variables (with `.env` support). The loader resolves every
//! duration, endpoint and stage tuning into an
//! [`enricher_core::PipelineConfig`] and runs the guard rails in
//! [`validation`] before handing the result to `enricherd`.

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigSource, error::ConfigLoadError};
pub use models::{
    Config, ConfigMetadata, ContentConfig, DatabaseConfig, NotifyConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
