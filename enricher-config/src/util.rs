use std::time::Duration;

use crate::ConfigLoadError;

/// Read an environment variable, treating blank values as unset.
pub fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn parse_csv_var(name: &str) -> Option<Vec<String>> {
    non_empty_var(name).map(|raw| {
        raw.split(',')
            .filter_map(|part| {
                let trimmed = part.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect()
    })
}

/// Parse a human-readable duration (`30s`, `6m`, `1h 30m`) for `field`.
pub fn parse_duration(
    field: &str,
    raw: &str,
) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|source| {
        ConfigLoadError::InvalidDuration {
            field: field.to_string(),
            value: raw.to_string(),
            source,
        }
    })
}

/// Duration rounded down to whole seconds, as stored by the core tuning.
pub fn duration_secs(
    field: &str,
    raw: &str,
) -> Result<u64, ConfigLoadError> {
    parse_duration(field, raw).map(|duration| duration.as_secs())
}

pub fn duration_millis(
    field: &str,
    raw: &str,
) -> Result<u64, ConfigLoadError> {
    parse_duration(field, raw)
        .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
