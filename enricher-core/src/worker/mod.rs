//! Generic stage worker.
//!
//! A [`Stage`] knows how to look one subject up at one provider. The
//! [`StageWorker`] wraps any stage with the shared discipline: decode and
//! validate the routed event, gate on subject type, retry locally, classify
//! the final failure, persist payloads, write the stage's status pair, and
//! acknowledge only after that write succeeded.

pub mod classify;
mod process;

use std::time::Duration;

use async_trait::async_trait;
use enricher_model::{StageDetails, StageName, Subject};

use crate::config::StageTuning;

pub use classify::{FailureSignature, StageError, classify_failure};
pub use process::{MessageOutcome, StageWorker};

/// Raw provider payload to persist next to a successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Slugged into the content key; usually the subject itself.
    pub slug_source: String,
    pub extension: &'static str,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn json(subject: &Subject, bytes: Vec<u8>) -> Self {
        Self {
            slug_source: subject.value(),
            extension: "json",
            bytes,
        }
    }
}

/// Successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct StageLookup {
    pub details: StageDetails,
    pub artifacts: Vec<Artifact>,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// Whether `subject` can be looked up at all. Unsupported subjects get
    /// a client-rejected status without any provider call.
    fn supports(&self, subject: &Subject) -> bool;

    async fn lookup(&self, subject: &Subject) -> Result<StageLookup, StageError>;
}

/// Bounded local retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Pause before every provider request, including the first.
    pub pacing: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, pacing: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            pacing,
        }
    }
}

impl From<&StageTuning> for RetryPolicy {
    fn from(tuning: &StageTuning) -> Self {
        Self::new(tuning.attempts, tuning.retry_delay())
    }
}
