use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ids::RecordKey, info::StageInfo, stage::StageName, status::StageStatus,
    subject::Subject,
};

/// One stage's owned pair of fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageSlot {
    pub status: StageStatus,
    pub info: Option<StageInfo>,
}

/// Durable per-identifier record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: RecordKey,
    pub subject: Subject,
    /// Caller metadata columns, carried verbatim onto canonical events.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub stages: BTreeMap<StageName, StageSlot>,
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// New record with every stage `NotStarted`.
    pub fn new(
        key: RecordKey,
        subject: Subject,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let stages = StageName::all()
            .iter()
            .map(|stage| (*stage, StageSlot::default()))
            .collect();
        Self {
            key,
            subject,
            metadata,
            stages,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self, stage: StageName) -> StageStatus {
        self.stages
            .get(&stage)
            .map(|slot| slot.status.clone())
            .unwrap_or_default()
    }

    pub fn info(&self, stage: StageName) -> Option<&StageInfo> {
        self.stages.get(&stage).and_then(|slot| slot.info.as_ref())
    }

    /// Replace exactly one stage's pair, leaving every other field alone.
    pub fn apply_stage(
        &mut self,
        stage: StageName,
        status: StageStatus,
        info: StageInfo,
    ) {
        self.stages.insert(
            stage,
            StageSlot {
                status,
                info: Some(info),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BatchId, ExecutionLog, SequenceKey};

    fn record() -> Record {
        Record::new(
            RecordKey::new(
                BatchId::new("T1").unwrap(),
                SequenceKey::new("20250101000000000000").unwrap(),
            ),
            Subject::domain("example.com").unwrap(),
            BTreeMap::new(),
        )
    }

    #[test]
    fn new_record_starts_every_stage() {
        let record = record();
        for stage in StageName::all() {
            assert_eq!(record.status(*stage), StageStatus::NotStarted);
            assert!(record.info(*stage).is_none());
        }
    }

    #[test]
    fn apply_stage_leaves_siblings_untouched() {
        let mut record = record();
        record.apply_stage(
            StageName::Dns,
            StageStatus::Ok,
            StageInfo::empty(ExecutionLog::default()),
        );
        assert_eq!(record.status(StageName::Dns), StageStatus::Ok);
        assert_eq!(record.status(StageName::Whois), StageStatus::NotStarted);
    }
}
