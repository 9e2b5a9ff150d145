use std::{collections::BTreeMap, fmt, time::Duration};

use enricher_model::StageName;
use serde::{Deserialize, Serialize};

/// Per-stage queue and worker tuning.
///
/// Defaults follow each provider's observed limits: the reputation stage
/// takes large batches under a shorter visibility window, the certificate
/// and archive stages take small batches because every lookup is slow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTuning {
    /// Messages pulled per receive.
    pub batch_size: usize,
    /// How long a received message stays hidden from other pollers.
    pub visibility_timeout_secs: u64,
    /// Number of concurrent poller tasks for the stage.
    pub concurrency: usize,
    /// Upper bound on one `process_batch` call.
    pub processing_timeout_secs: u64,
    /// Idle sleep between empty or disabled receives.
    pub poll_interval_ms: u64,
    /// Local attempts per message before classifying the failure.
    pub attempts: u32,
    /// Pause before every provider request.
    pub retry_delay_ms: u64,
}

impl StageTuning {
    pub fn for_stage(stage: StageName) -> Self {
        let base = Self {
            batch_size: 30,
            visibility_timeout_secs: 15 * 60,
            concurrency: 50,
            processing_timeout_secs: 15 * 60,
            poll_interval_ms: 1_000,
            attempts: 1,
            retry_delay_ms: 0,
        };
        match stage {
            StageName::Dns => Self {
                attempts: 3,
                ..base
            },
            StageName::Whois => Self {
                batch_size: 45,
                ..base
            },
            StageName::Cert => Self {
                batch_size: 15,
                attempts: 2,
                retry_delay_ms: 12_000,
                ..base
            },
            StageName::Content => Self {
                attempts: 2,
                retry_delay_ms: 2_000,
                ..base
            },
            StageName::Screenshot => Self {
                batch_size: 10,
                visibility_timeout_secs: 5 * 60,
                processing_timeout_secs: 5 * 60,
                ..base
            },
            StageName::Reputation => Self {
                batch_size: 120,
                visibility_timeout_secs: 8 * 60,
                processing_timeout_secs: 8 * 60,
                attempts: 3,
                retry_delay_ms: 1_000,
                ..base
            },
            StageName::Archive => Self {
                batch_size: 8,
                ..base
            },
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Timing of the backpressure protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSettings {
    /// Delay applied to every message sent back while intake is paused.
    pub requeue_delay_secs: u64,
    /// Wait after asking the controller to disable intake.
    pub drain_wait_secs: u64,
    /// Daily UTC time (`HH:MM`) at which paused stages are re-enabled.
    pub resume_at: String,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            requeue_delay_secs: 360,
            drain_wait_secs: 30,
            resume_at: "00:10".to_string(),
        }
    }
}

impl QuotaSettings {
    pub fn requeue_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_delay_secs)
    }

    pub fn drain_wait(&self) -> Duration {
        Duration::from_secs(self.drain_wait_secs)
    }
}

/// Provider endpoints and HTTP client settings shared by the stages.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub rdap_base: String,
    pub crtsh_base: String,
    pub reputation_base: String,
    /// Without a key the reputation stage is not started.
    #[serde(default)]
    pub reputation_api_key: Option<String>,
    pub archive_base: String,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("rdap_base", &self.rdap_base)
            .field("crtsh_base", &self.crtsh_base)
            .field("reputation_base", &self.reputation_base)
            .field(
                "reputation_api_key",
                &self.reputation_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("archive_base", &self.archive_base)
            .finish()
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 20,
            user_agent: concat!("enricher/", env!("CARGO_PKG_VERSION"))
                .to_string(),
            rdap_base: "https://rdap.org".to_string(),
            crtsh_base: "https://crt.sh".to_string(),
            reputation_base: "https://www.virustotal.com/api/v3".to_string(),
            reputation_api_key: None,
            archive_base: "https://web.archive.org".to_string(),
        }
    }
}

impl ProviderSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Runtime knobs for the whole pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub stages: BTreeMap<StageName, StageTuning>,
    pub quota: QuotaSettings,
    pub providers: ProviderSettings,
    /// Canonical events pulled from the change feed per notifier tick.
    pub notifier_fetch_limit: usize,
    pub notifier_poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: StageName::all()
                .iter()
                .map(|stage| (*stage, StageTuning::for_stage(*stage)))
                .collect(),
            quota: QuotaSettings::default(),
            providers: ProviderSettings::default(),
            notifier_fetch_limit: 256,
            notifier_poll_interval_ms: 500,
        }
    }
}

impl PipelineConfig {
    /// Tuning for `stage`, falling back to the built-in defaults.
    pub fn tuning(&self, stage: StageName) -> StageTuning {
        self.stages
            .get(&stage)
            .copied()
            .unwrap_or_else(|| StageTuning::for_stage(stage))
    }

    pub fn notifier_poll_interval(&self) -> Duration {
        Duration::from_millis(self.notifier_poll_interval_ms)
    }
}
