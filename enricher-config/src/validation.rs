use std::fmt;

use enricher_core::{quota::DailySchedule, runtime::RATE_LIMITED_STAGES};
use enricher_model::StageName;
use thiserror::Error;
use tracing::warn;

use crate::Config;

/// Configuration that would break the pipeline's delivery guarantees.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("stage {stage}: batch_size must be at least 1")]
    ZeroBatchSize { stage: StageName },

    #[error("stage {stage}: attempts must be at least 1")]
    ZeroAttempts { stage: StageName },

    #[error("stage {stage}: concurrency must be at least 1")]
    ZeroConcurrency { stage: StageName },

    #[error("stage {stage}: visibility_timeout must be non-zero")]
    ZeroVisibilityTimeout { stage: StageName },

    #[error(
        "quota.requeue_delay ({requeue_delay_secs}s) must exceed quota.drain_wait ({drain_wait_secs}s)"
    )]
    RequeueWithinDrainWait {
        requeue_delay_secs: u64,
        drain_wait_secs: u64,
    },

    #[error(
        "stage {stage}: visibility_timeout ({visibility_timeout_secs}s) must exceed quota.drain_wait ({drain_wait_secs}s)"
    )]
    DrainOutlastsVisibility {
        stage: StageName,
        visibility_timeout_secs: u64,
        drain_wait_secs: u64,
    },

    #[error("quota.resume_at `{value}` is not an HH:MM time")]
    InvalidResumeTime { value: String },

    #[error("pipeline.notifier_fetch_limit must be at least 1")]
    ZeroNotifierFetchLimit,
}

/// Non-fatal findings surfaced at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The reputation stage will not start and its queue will grow.
    MissingReputationKey,
    /// A batch can still be running when its messages become visible again.
    ProcessingOutlastsVisibility { stage: StageName },
    /// `run_stages` is set but empty.
    NoStagesSelected,
    InsecureWebhook,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::MissingReputationKey => {
                f.write_str("no reputation API key; the vt stage will not run")
            }
            ConfigWarning::ProcessingOutlastsVisibility { stage } => write!(
                f,
                "stage {stage}: processing_timeout exceeds visibility_timeout; messages may be processed twice"
            ),
            ConfigWarning::NoStagesSelected => {
                f.write_str("run_stages is empty; no stage workers will start")
            }
            ConfigWarning::InsecureWebhook => {
                f.write_str("alert webhook is not https")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigWarnings(Vec<ConfigWarning>);

impl ConfigWarnings {
    pub fn push(&mut self, warning: ConfigWarning) {
        self.0.push(warning);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.0.iter()
    }

    pub fn contains(&self, warning: &ConfigWarning) -> bool {
        self.0.contains(warning)
    }

    pub fn log(&self) {
        for warning in &self.0 {
            warn!("config: {warning}");
        }
    }
}

/// Check the guard rails, returning the first violation or every
/// non-fatal finding.
pub fn validate(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let pipeline = &config.pipeline;
    let quota = &pipeline.quota;
    let mut warnings = ConfigWarnings::default();

    for stage in StageName::all() {
        let stage = *stage;
        let tuning = pipeline.tuning(stage);
        if tuning.batch_size == 0 {
            return Err(ConfigGuardRailError::ZeroBatchSize { stage });
        }
        if tuning.attempts == 0 {
            return Err(ConfigGuardRailError::ZeroAttempts { stage });
        }
        if tuning.concurrency == 0 {
            return Err(ConfigGuardRailError::ZeroConcurrency { stage });
        }
        if tuning.visibility_timeout_secs == 0 {
            return Err(ConfigGuardRailError::ZeroVisibilityTimeout { stage });
        }
        if tuning.processing_timeout_secs > tuning.visibility_timeout_secs {
            warnings.push(ConfigWarning::ProcessingOutlastsVisibility { stage });
        }
    }

    if quota.requeue_delay_secs <= quota.drain_wait_secs {
        return Err(ConfigGuardRailError::RequeueWithinDrainWait {
            requeue_delay_secs: quota.requeue_delay_secs,
            drain_wait_secs: quota.drain_wait_secs,
        });
    }

    // A message must stay hidden until the worker that hit the quota has
    // waited out the drain and requeued it.
    for stage in RATE_LIMITED_STAGES {
        let tuning = pipeline.tuning(*stage);
        if tuning.visibility_timeout_secs <= quota.drain_wait_secs {
            return Err(ConfigGuardRailError::DrainOutlastsVisibility {
                stage: *stage,
                visibility_timeout_secs: tuning.visibility_timeout_secs,
                drain_wait_secs: quota.drain_wait_secs,
            });
        }
    }

    if DailySchedule::parse(&quota.resume_at).is_err() {
        return Err(ConfigGuardRailError::InvalidResumeTime {
            value: quota.resume_at.clone(),
        });
    }

    if pipeline.notifier_fetch_limit == 0 {
        return Err(ConfigGuardRailError::ZeroNotifierFetchLimit);
    }

    if config.runs(StageName::Reputation)
        && pipeline
            .providers
            .reputation_api_key
            .as_deref()
            .is_none_or(|key| key.trim().is_empty())
    {
        warnings.push(ConfigWarning::MissingReputationKey);
    }
    if config
        .run_stages
        .as_ref()
        .is_some_and(|stages| stages.is_empty())
    {
        warnings.push(ConfigWarning::NoStagesSelected);
    }
    if config
        .notify
        .webhook_url
        .as_ref()
        .is_some_and(|url| url.scheme() != "https")
    {
        warnings.push(ConfigWarning::InsecureWebhook);
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn defaults_pass_with_missing_key_warning() {
        let warnings = validate(&Config::default()).unwrap();
        assert!(warnings.contains(&ConfigWarning::MissingReputationKey));
        assert_eq!(warnings.iter().count(), 1);
    }

    #[test]
    fn zero_batch_size_and_attempts_are_rejected() {
        let mut config = Config::default();
        if let Some(tuning) = config.pipeline.stages.get_mut(&StageName::Whois) {
            tuning.batch_size = 0;
        }
        assert_eq!(
            validate(&config).unwrap_err(),
            ConfigGuardRailError::ZeroBatchSize {
                stage: StageName::Whois
            }
        );

        let mut config = Config::default();
        if let Some(tuning) = config.pipeline.stages.get_mut(&StageName::Dns) {
            tuning.attempts = 0;
        }
        assert_eq!(
            validate(&config).unwrap_err(),
            ConfigGuardRailError::ZeroAttempts {
                stage: StageName::Dns
            }
        );
    }

    #[test]
    fn requeue_delay_must_exceed_drain_wait() {
        let mut config = Config::default();
        config.pipeline.quota.requeue_delay_secs = 30;
        config.pipeline.quota.drain_wait_secs = 30;
        assert!(matches!(
            validate(&config).unwrap_err(),
            ConfigGuardRailError::RequeueWithinDrainWait { .. }
        ));
    }

    #[test]
    fn reputation_visibility_must_outlast_drain() {
        let mut config = Config::default();
        if let Some(tuning) =
            config.pipeline.stages.get_mut(&StageName::Reputation)
        {
            tuning.visibility_timeout_secs = 20;
            tuning.processing_timeout_secs = 20;
        }
        assert!(matches!(
            validate(&config).unwrap_err(),
            ConfigGuardRailError::DrainOutlastsVisibility { .. }
        ));
    }

    #[test]
    fn malformed_resume_time_is_rejected() {
        let mut config = Config::default();
        config.pipeline.quota.resume_at = "25:99".into();
        assert!(matches!(
            validate(&config).unwrap_err(),
            ConfigGuardRailError::InvalidResumeTime { .. }
        ));
    }

    #[test]
    fn deselected_reputation_stage_needs_no_key() {
        let mut config = Config::default();
        config.run_stages = Some(BTreeSet::from([StageName::Dns]));
        config.notify.webhook_url =
            Some(url::Url::parse("http://hooks.internal/alert").unwrap());
        let warnings = validate(&config).unwrap();
        assert!(!warnings.contains(&ConfigWarning::MissingReputationKey));
        assert!(warnings.contains(&ConfigWarning::InsecureWebhook));
    }
}
