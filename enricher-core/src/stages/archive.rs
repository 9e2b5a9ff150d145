use async_trait::async_trait;
use chrono::NaiveDateTime;
use enricher_model::{ArchiveDetails, StageDetails, StageName, Subject};
use serde_json::{Value, json};

use super::check_status;
use crate::worker::{Artifact, Stage, StageError, StageLookup};

/// Newest Wayback Machine snapshot, from the CDX server.
#[derive(Debug, Clone)]
pub struct ArchiveStage {
    client: reqwest::Client,
    base: String,
}

impl ArchiveStage {
    pub fn new(client: reqwest::Client, base: &str) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

/// One CDX row: `[timestamp, original]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    timestamp: String,
    original: String,
}

#[async_trait]
impl Stage for ArchiveStage {
    fn name(&self) -> StageName {
        StageName::Archive
    }

    fn supports(&self, subject: &Subject) -> bool {
        subject.is_domain()
    }

    async fn lookup(
        &self,
        subject: &Subject,
    ) -> Result<StageLookup, StageError> {
        let response = self
            .client
            .get(format!("{}/cdx/search/cdx", self.base))
            .query(&[
                ("url", subject.value().as_str()),
                ("output", "json"),
                ("fl", "timestamp,original"),
                ("limit", "-1"),
            ])
            .send()
            .await?;
        let body = check_status(response)?.bytes().await?;
        let rows: Value = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Array(Vec::new())
        } else {
            serde_json::from_slice(&body).map_err(|err| {
                StageError::Other(format!("invalid CDX body: {err}"))
            })?
        };
        let snapshot = newest(&rows).ok_or(StageError::NotFound)?;

        let archive_url = format!(
            "{}/web/{}/{}",
            self.base, snapshot.timestamp, snapshot.original
        );
        let details = ArchiveDetails {
            archive_url: archive_url.clone(),
            timestamp: display_timestamp(&snapshot.timestamp),
        };
        let payload = serde_json::to_vec(&json!({
            "timestamp": snapshot.timestamp,
            "original": snapshot.original,
            "archive_url": archive_url,
        }))
        .map_err(|err| StageError::Other(err.to_string()))?;

        Ok(StageLookup {
            details: StageDetails::Archive(details),
            artifacts: vec![Artifact::json(subject, payload)],
        })
    }
}

/// Last data row of a CDX JSON response; the first row is the header.
fn newest(rows: &Value) -> Option<Snapshot> {
    let rows = rows.as_array()?;
    let row = rows.get(1..)?.last()?.as_array()?;
    Some(Snapshot {
        timestamp: row.first()?.as_str()?.to_string(),
        original: row.get(1)?.as_str()?.to_string(),
    })
}

/// `YYYYMMDDhhmmss` rendered as `dd-mm-YYYYThh:mm:ss`; unparseable stamps
/// are kept verbatim.
fn display_timestamp(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
        .map(|ts| ts.format("%d-%m-%YT%H:%M:%S").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_only_response_has_no_snapshot() {
        assert_eq!(newest(&json!([["timestamp", "original"]])), None);
        assert_eq!(newest(&json!([])), None);
    }

    #[test]
    fn newest_row_is_last() {
        let rows = json!([
            ["timestamp", "original"],
            ["20240101120000", "http://example.com/"]
        ]);
        let snapshot = newest(&rows).unwrap();
        assert_eq!(snapshot.timestamp, "20240101120000");
        assert_eq!(display_timestamp(&snapshot.timestamp), "01-01-2024T12:00:00");
    }
}
