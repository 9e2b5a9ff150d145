//! Convenience producer: turns a plain identifier list into records.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use enricher_model::{BatchId, Record, RecordKey, SequenceKey, Subject};
use tracing::{info, warn};

use crate::{
    error::{EnricherError, Result},
    store::RecordStore,
};

#[derive(Debug, Default)]
pub struct SeedReport {
    pub inserted: Vec<RecordKey>,
    /// Input line number (1-based) and the reason it was not inserted.
    pub skipped: Vec<(usize, String)>,
}

/// Strictly increasing sequence keys, even for inserts within the same
/// microsecond.
#[derive(Debug, Default)]
struct SequenceClock {
    last: Option<DateTime<Utc>>,
}

impl SequenceClock {
    fn next(&mut self) -> SequenceKey {
        let mut at = Utc::now();
        if let Some(last) = self.last
            && at <= last
        {
            at = last + TimeDelta::microseconds(1);
        }
        self.last = Some(at);
        SequenceKey::at(at)
    }
}

/// Insert one record per non-blank line. Lines starting with `#` are
/// ignored. Unparseable identifiers and duplicate keys are reported, not
/// fatal; store failures are.
pub async fn seed_identifiers<'a>(
    store: &dyn RecordStore,
    batch: &BatchId,
    lines: impl IntoIterator<Item = &'a str>,
) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    let mut clock = SequenceClock::default();

    for (index, line) in lines.into_iter().enumerate() {
        let line_no = index + 1;
        let raw = line.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let subject = match Subject::classify(raw) {
            Ok(subject) => subject,
            Err(err) => {
                warn!(line = line_no, error = %err, "skipping identifier");
                report.skipped.push((line_no, err.to_string()));
                continue;
            }
        };
        let key = RecordKey::new(batch.clone(), clock.next());
        match store
            .insert(Record::new(key.clone(), subject, BTreeMap::new()))
            .await
        {
            Ok(()) => report.inserted.push(key),
            Err(EnricherError::Conflict(reason)) => {
                report.skipped.push((line_no, reason));
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        batch = %batch,
        inserted = report.inserted.len(),
        skipped = report.skipped.len(),
        "batch seeded"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use enricher_model::{StageName, StageStatus, SubjectKind};

    use super::*;
    use crate::store::InMemoryRecordStore;

    #[tokio::test]
    async fn seeds_domains_and_addresses_with_unique_keys() {
        let store = InMemoryRecordStore::new();
        let batch = BatchId::new("T1").unwrap();
        let input = "example.com\n\n# comment\n10.0.0.1\nbad host\nexample.org";

        let report = seed_identifiers(&store, &batch, input.lines())
            .await
            .unwrap();

        assert_eq!(report.inserted.len(), 3);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, 5);

        let records = store.list_batch(&batch).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].subject.kind(), SubjectKind::IpAddress);
        for record in &records {
            assert_eq!(record.key.sequence_key.as_str().len(), 20);
            assert_eq!(record.status(StageName::Dns), StageStatus::NotStarted);
        }
        let mut keys: Vec<_> = report.inserted.clone();
        keys.dedup();
        assert_eq!(keys.len(), 3);
    }
}
