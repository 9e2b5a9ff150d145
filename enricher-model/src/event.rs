use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    error::{ModelError, Result},
    ids::{BatchId, RecordKey, SequenceKey},
    record::Record,
    stage::StageName,
    subject::{Subject, SubjectKind},
};

/// Well-known attribute keys carried on canonical events.
pub mod attribute_keys {
    pub const BATCH_ID: &str = "batch_id";
    pub const SEQUENCE_KEY: &str = "sequence_key";
    pub const DOMAIN: &str = "domain";
    pub const IP_ADDRESS: &str = "ip_address";
}

/// Scalar attribute value. Filters compare the string rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AttributeValue {
    String(String),
    Number(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> &str {
        match self {
            AttributeValue::String(value) | AttributeValue::Number(value) => {
                value
            }
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat, filterable representation of a record-creation change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    #[serde(rename = "message")]
    pub body: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl CanonicalEvent {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Insert a string attribute. Blank values are dropped, matching how
    /// empty columns never become filterable attributes.
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.trim().is_empty() {
            return;
        }
        self.attributes
            .insert(key.into(), AttributeValue::String(value));
    }

    /// Build the single event emitted for a freshly inserted record.
    pub fn from_record(record: &Record) -> Self {
        let mut event = CanonicalEvent::new(format!(
            "New record: {}",
            record.key
        ));
        for (key, value) in &record.metadata {
            if !is_reserved_key(key) {
                event.insert(key.clone(), value.clone());
            }
        }
        event.insert(attribute_keys::BATCH_ID, record.key.batch_id.as_str());
        event.insert(
            attribute_keys::SEQUENCE_KEY,
            record.key.sequence_key.as_str(),
        );
        event.insert(
            record.subject.kind().attribute_key(),
            record.subject.value(),
        );
        for (stage, slot) in &record.stages {
            event.insert(stage.status_attribute(), slot.status.as_wire());
        }
        event
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(AttributeValue::as_str)
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| ModelError::MissingAttribute(key.to_string()))
    }

    pub fn record_key(&self) -> Result<RecordKey> {
        Ok(RecordKey::new(
            BatchId::new(self.require(attribute_keys::BATCH_ID)?)?,
            SequenceKey::new(self.require(attribute_keys::SEQUENCE_KEY)?)?,
        ))
    }

    /// Recover the subject. A domain wins when both keys are present.
    pub fn subject(&self) -> Result<Subject> {
        if let Some(domain) = self.get(SubjectKind::Domain.attribute_key()) {
            return Subject::domain(domain);
        }
        if let Some(ip) = self.get(SubjectKind::IpAddress.attribute_key()) {
            return Subject::ip_address(ip);
        }
        Err(ModelError::MissingAttribute(format!(
            "{} or {}",
            attribute_keys::DOMAIN,
            attribute_keys::IP_ADDRESS
        )))
    }
}

/// Metadata may not shadow identity, subject or gating keys.
fn is_reserved_key(key: &str) -> bool {
    matches!(
        key,
        attribute_keys::BATCH_ID
            | attribute_keys::SEQUENCE_KEY
            | attribute_keys::DOMAIN
            | attribute_keys::IP_ADDRESS
    ) || StageName::all()
        .iter()
        .any(|stage| stage.status_attribute() == key)
}
