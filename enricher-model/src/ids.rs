use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Identifier of one producer batch (one uploaded identifier list).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ModelError::EmptyIdentifier("batch id"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Time-derived sort key, unique within a batch.
///
/// Rendered as `YYYYMMDDhhmmss` followed by six microsecond digits, so keys
/// sort lexicographically in creation order.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceKey(String);

impl SequenceKey {
    pub const FORMAT: &'static str = "%Y%m%d%H%M%S%6f";

    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ModelError::EmptyIdentifier("sequence key"));
        }
        Ok(Self(value))
    }

    pub fn at(instant: DateTime<Utc>) -> Self {
        Self(instant.format(Self::FORMAT).to_string())
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite identity of a record.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RecordKey {
    pub batch_id: BatchId,
    pub sequence_key: SequenceKey,
}

impl RecordKey {
    pub fn new(batch_id: BatchId, sequence_key: SequenceKey) -> Self {
        Self {
            batch_id,
            sequence_key,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}---{}", self.batch_id, self.sequence_key)
    }
}
