use std::fmt;

use async_trait::async_trait;
use enricher_model::{ReputationDetails, StageDetails, StageName, Subject};
use serde_json::Value;

use super::check_status;
use crate::worker::{Artifact, Stage, StageError, StageLookup};

/// Threat-intel reputation lookup (VirusTotal v3 API).
///
/// This is the only stage whose provider enforces a daily quota; an HTTP
/// 429 surfaces as [`StageError::RateLimited`] and is handled by the quota
/// protocol rather than written as a status.
#[derive(Clone)]
pub struct ReputationStage {
    client: reqwest::Client,
    base: String,
    api_key: String,
}

impl fmt::Debug for ReputationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReputationStage")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl ReputationStage {
    pub fn new(client: reqwest::Client, base: &str, api_key: String) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, subject: &Subject) -> String {
        match subject {
            Subject::Domain(domain) => {
                format!("{}/domains/{domain}", self.base)
            }
            Subject::IpAddress(ip) => {
                format!("{}/ip_addresses/{ip}", self.base)
            }
        }
    }
}

#[async_trait]
impl Stage for ReputationStage {
    fn name(&self) -> StageName {
        StageName::Reputation
    }

    fn supports(&self, _subject: &Subject) -> bool {
        true
    }

    async fn lookup(
        &self,
        subject: &Subject,
    ) -> Result<StageLookup, StageError> {
        let response = self
            .client
            .get(self.url(subject))
            .header("x-apikey", &self.api_key)
            .send()
            .await?;
        let body = check_status(response)?.bytes().await?;
        let report: Value = serde_json::from_slice(&body).map_err(|err| {
            StageError::Other(format!("invalid reputation body: {err}"))
        })?;

        Ok(StageLookup {
            details: StageDetails::Reputation(summarize(&report)),
            artifacts: vec![Artifact::json(subject, body.to_vec())],
        })
    }
}

fn summarize(report: &Value) -> ReputationDetails {
    let attributes = report.pointer("/data/attributes");
    let stat = |name: &str| {
        attributes
            .and_then(|a| a.pointer(&format!("/last_analysis_stats/{name}")))
            .and_then(Value::as_u64)
    };
    ReputationDetails {
        malicious: stat("malicious"),
        suspicious: stat("suspicious"),
        reputation: attributes
            .and_then(|a| a.get("reputation"))
            .and_then(Value::as_i64),
    }
}
