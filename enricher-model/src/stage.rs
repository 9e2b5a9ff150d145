use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Enrichment stages. Each one owns a disjoint `<name>_status` /
/// `<name>_info` pair on every record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
pub enum StageName {
    #[serde(rename = "dns")]
    Dns,
    #[serde(rename = "whois")]
    Whois,
    #[serde(rename = "cert")]
    Cert,
    #[serde(rename = "html")]
    Content,
    #[serde(rename = "ss")]
    Screenshot,
    #[serde(rename = "vt")]
    Reputation,
    #[serde(rename = "hist")]
    Archive,
}

impl StageName {
    pub fn all() -> &'static [StageName] {
        &[
            StageName::Dns,
            StageName::Whois,
            StageName::Cert,
            StageName::Content,
            StageName::Screenshot,
            StageName::Reputation,
            StageName::Archive,
        ]
    }

    /// Short name used in attribute keys, queue names and content keys.
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Dns => "dns",
            StageName::Whois => "whois",
            StageName::Cert => "cert",
            StageName::Content => "html",
            StageName::Screenshot => "ss",
            StageName::Reputation => "vt",
            StageName::Archive => "hist",
        }
    }

    /// Gating attribute the router filters on.
    pub fn status_attribute(self) -> String {
        format!("{}_status", self.as_str())
    }

    pub fn info_attribute(self) -> String {
        format!("{}_info", self.as_str())
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::all()
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ModelError::UnknownStage(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for stage in StageName::all() {
            assert_eq!(stage.as_str().parse::<StageName>().unwrap(), *stage);
        }
        assert!("geo".parse::<StageName>().is_err());
    }

    #[test]
    fn gating_attribute_uses_short_name() {
        assert_eq!(StageName::Reputation.status_attribute(), "vt_status");
        assert_eq!(StageName::Archive.info_attribute(), "hist_info");
    }
}
