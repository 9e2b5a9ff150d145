//! Per-stage result payloads.
//!
//! `StageInfo` is what a stage writes next to its status. The `details`
//! union is closed: each stage has exactly one variant, and sentinel or
//! failure writes use [`StageDetails::Empty`].

use serde::{Deserialize, Serialize};

use crate::stage::StageName;

/// Diagnostic metadata attached to every stage write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub duration_secs: u64,
    pub execution_id: String,
    pub worker_id: String,
    pub attempts: u32,
}

/// Whole-value payload stored in a record's `<stage>_info` attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInfo {
    pub details: StageDetails,
    /// Content-store locations of the raw payloads persisted for this write.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    pub log: ExecutionLog,
}

impl StageInfo {
    pub fn empty(log: ExecutionLog) -> Self {
        Self {
            details: StageDetails::Empty,
            artifacts: Vec::new(),
            log,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageDetails {
    Empty,
    Dns(DnsDetails),
    Whois(WhoisDetails),
    Cert(CertDetails),
    Content(ContentDetails),
    Reputation(ReputationDetails),
    Archive(ArchiveDetails),
}

impl StageDetails {
    /// Stage that owns this variant. `Empty` belongs to every stage.
    pub fn owner(&self) -> Option<StageName> {
        match self {
            StageDetails::Empty => None,
            StageDetails::Dns(_) => Some(StageName::Dns),
            StageDetails::Whois(_) => Some(StageName::Whois),
            StageDetails::Cert(_) => Some(StageName::Cert),
            StageDetails::Content(_) => Some(StageName::Content),
            StageDetails::Reputation(_) => Some(StageName::Reputation),
            StageDetails::Archive(_) => Some(StageName::Archive),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsDetails {
    pub hostname: String,
    pub aliases: Vec<String>,
    pub addresses: Vec<String>,
    /// Empty when the nameserver lookup failed; that is not fatal.
    pub nameservers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WhoisDetails {
    Domain {
        registrar: Option<String>,
        name: Option<String>,
        org: Option<String>,
        creation_date: Option<String>,
        updated_date: Option<String>,
    },
    Network {
        asn_registry: Option<String>,
        asn: Option<String>,
        asn_cidr: Option<String>,
        asn_country_code: Option<String>,
        asn_date: Option<String>,
        asn_description: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertDetails {
    pub common_name: String,
    pub name_value: String,
    pub issuer_name: String,
    pub not_before: String,
    pub not_after: String,
    pub entry_count: usize,
    pub subject_common_names: Vec<String>,
    pub issuers: Vec<String>,
    pub distinct_alt_names: usize,
    pub alt_names_min: usize,
    pub alt_names_max: usize,
}

/// Result of fetching the subject over one protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureAttempt {
    pub url: String,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub redirects: Vec<String>,
    pub script_links: Vec<String>,
    /// Script links that could not be downloaded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_scripts: Vec<String>,
    /// Android package downloads linked from the page.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apk_links: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDetails {
    pub captures: Vec<CaptureAttempt>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationDetails {
    pub malicious: Option<u64>,
    pub suspicious: Option<u64>,
    pub reputation: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveDetails {
    pub archive_url: String,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_are_tagged_by_stage() {
        let info = StageInfo {
            details: StageDetails::Dns(DnsDetails {
                hostname: "example.com".into(),
                ..DnsDetails::default()
            }),
            artifacts: vec!["T1/dns/example-com_1.json".into()],
            log: ExecutionLog::default(),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["details"]["stage"], "dns");
        assert_eq!(value["details"]["hostname"], "example.com");
        assert_eq!(info.details.owner(), Some(StageName::Dns));
    }

    #[test]
    fn capture_lists_are_omitted_when_empty() {
        let capture = CaptureAttempt {
            url: "https://example.com".into(),
            status: Some(200),
            error: None,
            redirects: Vec::new(),
            script_links: vec!["https://example.com/a.js".into()],
            failed_scripts: vec!["https://example.com/a.js".into()],
            apk_links: Vec::new(),
        };
        let value = serde_json::to_value(&capture).unwrap();
        assert_eq!(value["failed_scripts"][0], "https://example.com/a.js");
        assert!(value.get("apk_links").is_none());

        let stored = r#"{"url":"http://example.com","status":200,"error":null,"redirects":[],"script_links":[]}"#;
        let parsed: CaptureAttempt = serde_json::from_str(stored).unwrap();
        assert!(parsed.failed_scripts.is_empty());
        assert!(parsed.apk_links.is_empty());
    }
}
