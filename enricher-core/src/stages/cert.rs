use std::collections::BTreeSet;

use async_trait::async_trait;
use enricher_model::{CertDetails, StageDetails, StageName, Subject};
use serde::Deserialize;

use super::check_status;
use crate::worker::{Artifact, Stage, StageError, StageLookup};

/// Certificate transparency search against crt.sh.
///
/// The provider allows about five requests per minute per client; pacing
/// comes from the stage's retry delay.
#[derive(Debug, Clone)]
pub struct CertStage {
    client: reqwest::Client,
    base: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CertEntry {
    #[serde(default)]
    common_name: String,
    #[serde(default)]
    name_value: String,
    #[serde(default)]
    issuer_name: String,
    #[serde(default)]
    not_before: String,
    #[serde(default)]
    not_after: String,
}

impl CertStage {
    pub fn new(client: reqwest::Client, base: &str) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Stage for CertStage {
    fn name(&self) -> StageName {
        StageName::Cert
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
            .get(format!("{}/", self.base))
            .query(&[("q", subject.value().as_str()), ("output", "json")])
            .send()
            .await?;
        let body = check_status(response)?.bytes().await?;
        let entries: Vec<CertEntry> = if body.iter().all(u8::is_ascii_whitespace) {
            Vec::new()
        } else {
            serde_json::from_slice(&body).map_err(|err| {
                StageError::Other(format!("invalid crt.sh body: {err}"))
            })?
        };
        let details = summarize(&entries).ok_or(StageError::NotFound)?;

        Ok(StageLookup {
            details: StageDetails::Cert(details),
            artifacts: vec![Artifact::json(subject, body.to_vec())],
        })
    }
}

/// Summary of a crt.sh result set; `None` when no certificate was found.
fn summarize(entries: &[CertEntry]) -> Option<CertDetails> {
    let first = entries.first()?;
    let mut subject_common_names = BTreeSet::new();
    let mut issuers = BTreeSet::new();
    let mut alt_names = BTreeSet::new();
    let mut alt_names_min = usize::MAX;
    let mut alt_names_max = 0;
    for entry in entries {
        subject_common_names.insert(entry.common_name.clone());
        issuers.insert(entry.issuer_name.clone());
        alt_names.insert(entry.name_value.clone());
        let inside = entry.name_value.matches('\n').count() + 1;
        alt_names_min = alt_names_min.min(inside);
        alt_names_max = alt_names_max.max(inside);
    }
    Some(CertDetails {
        common_name: first.common_name.clone(),
        name_value: first.name_value.clone(),
        issuer_name: first.issuer_name.clone(),
        not_before: first.not_before.clone(),
        not_after: first.not_after.clone(),
        entry_count: entries.len(),
        subject_common_names: subject_common_names.into_iter().collect(),
        issuers: issuers.into_iter().collect(),
        distinct_alt_names: alt_names.len(),
        alt_names_min,
        alt_names_max,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cn: &str, names: &str, issuer: &str) -> CertEntry {
        CertEntry {
            common_name: cn.into(),
            name_value: names.into(),
            issuer_name: issuer.into(),
            not_before: "2025-01-01T00:00:00".into(),
            not_after: "2025-04-01T00:00:00".into(),
        }
    }

    #[test]
    fn empty_result_set_is_not_found() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn summary_counts_distinct_names_and_issuers() {
        let entries = vec![
            entry("example.com", "example.com\nwww.example.com", "R3"),
            entry("example.com", "example.com", "R3"),
            entry("www.example.com", "www.example.com", "E1"),
        ];
        let details = summarize(&entries).unwrap();
        assert_eq!(details.entry_count, 3);
        assert_eq!(details.common_name, "example.com");
        assert_eq!(details.subject_common_names.len(), 2);
        assert_eq!(details.issuers, vec!["E1".to_string(), "R3".to_string()]);
        assert_eq!(details.distinct_alt_names, 3);
        assert_eq!(details.alt_names_min, 1);
        assert_eq!(details.alt_names_max, 2);
    }
}
