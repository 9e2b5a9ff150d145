//! Quota backpressure for rate-limited stages.
//!
//! Each rate-limited stage has an enablement binding in an external
//! register: an `Enabled`/`Disabled` flag that gates whether its queue is
//! polled, plus the breaker phase (`Flowing`, `Draining`, `Paused`,
//! `Escalated`). Workers that hit the provider quota run the
//! [`BackpressureProtocol`]; the single [`QuotaController`] actor owns the
//! enablement flag and re-enables paused stages on a daily schedule.

pub mod backpressure;
pub mod controller;
pub mod register;
pub mod schedule;

use std::fmt;

use chrono::{DateTime, Utc};
use enricher_model::{CanonicalEvent, StageName};
use serde::{Deserialize, Serialize};

pub use backpressure::{BackpressureOutcome, BackpressureProtocol};
pub use controller::{
    ControlOutcome, QuotaCommand, QuotaControl, QuotaController, QuotaHandle,
};
pub use register::{EnablementRegister, InMemoryEnablementRegister};
pub use schedule::{DailySchedule, spawn_daily_resume};

/// Fixed escalation text. The escalation subscription filters on it, so the
/// payload and the filter always change together.
pub const ESCALATION_MESSAGE: &str =
    "WARNING: reputation quota exceeded and failed to disable stage intake";

pub const ALERT_ATTRIBUTE: &str = "alert";
pub const QUOTA_ALERT: &str = "quota";
pub const STAGE_ATTRIBUTE: &str = "stage";

/// Event routed to the out-of-band channel when intake could not be paused.
pub fn escalation_event(stage: StageName) -> CanonicalEvent {
    CanonicalEvent::new(ESCALATION_MESSAGE)
        .with_attribute(ALERT_ATTRIBUTE, QUOTA_ALERT)
        .with_attribute(STAGE_ATTRIBUTE, stage.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnablementState {
    Enabled,
    Disabled,
}

impl EnablementState {
    pub fn as_str(self) -> &'static str {
        match self {
            EnablementState::Enabled => "enabled",
            EnablementState::Disabled => "disabled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "enabled" => Some(EnablementState::Enabled),
            "disabled" => Some(EnablementState::Disabled),
            _ => None,
        }
    }
}

impl fmt::Display for EnablementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaPhase {
    Flowing,
    Draining,
    Paused,
    /// Disabling intake failed; only a forced enable recovers.
    Escalated,
}

impl QuotaPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaPhase::Flowing => "flowing",
            QuotaPhase::Draining => "draining",
            QuotaPhase::Paused => "paused",
            QuotaPhase::Escalated => "escalated",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "flowing" => Some(QuotaPhase::Flowing),
            "draining" => Some(QuotaPhase::Draining),
            "paused" => Some(QuotaPhase::Paused),
            "escalated" => Some(QuotaPhase::Escalated),
            _ => None,
        }
    }
}

impl fmt::Display for QuotaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live binding between a stage queue and its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBinding {
    pub state: EnablementState,
    pub phase: QuotaPhase,
    pub updated_at: DateTime<Utc>,
}

impl QueueBinding {
    pub fn flowing() -> Self {
        Self {
            state: EnablementState::Enabled,
            phase: QuotaPhase::Flowing,
            updated_at: Utc::now(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state == EnablementState::Enabled
    }
}

impl Default for QueueBinding {
    fn default() -> Self {
        Self::flowing()
    }
}
