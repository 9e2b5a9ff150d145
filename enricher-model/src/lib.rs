//! Core data model definitions shared across enricher crates.
//!
//! Everything here is plain data: identities, subjects, stage names, status
//! codes and the per-stage info union. Behaviour that touches storage,
//! queues or the network lives in `enricher-core`.
#![allow(missing_docs)]

pub mod error;
pub mod event;
pub mod ids;
pub mod info;
pub mod record;
pub mod stage;
pub mod status;
pub mod subject;

pub use error::{ModelError, Result as ModelResult};
pub use event::{AttributeValue, CanonicalEvent, attribute_keys};
pub use ids::{BatchId, RecordKey, SequenceKey};
pub use info::{
    ArchiveDetails, CaptureAttempt, CertDetails, ContentDetails, DnsDetails,
    ExecutionLog, ReputationDetails, StageDetails, StageInfo, WhoisDetails,
};
pub use record::{Record, StageSlot};
pub use stage::StageName;
pub use status::StageStatus;
pub use subject::{Subject, SubjectKind, slugify};
