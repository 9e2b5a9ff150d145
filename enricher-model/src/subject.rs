use std::{fmt, net::IpAddr};

use serde::{Deserialize, Serialize};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::error::{ModelError, Result};

/// What kind of identifier a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Domain,
    IpAddress,
}

impl SubjectKind {
    /// Attribute key used on canonical events for this kind.
    pub fn attribute_key(self) -> &'static str {
        match self {
            SubjectKind::Domain => "domain",
            SubjectKind::IpAddress => "ip_address",
        }
    }
}

/// The identifier being enriched: exactly one of a domain or an IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Subject {
    Domain(String),
    IpAddress(IpAddr),
}

impl Subject {
    pub fn domain(value: impl Into<String>) -> Result<Self> {
        let value = value.into().trim().to_ascii_lowercase();
        if value.is_empty() {
            return Err(ModelError::EmptyIdentifier("domain"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(ModelError::InvalidSubject(format!(
                "domain `{value}` contains whitespace"
            )));
        }
        Ok(Subject::Domain(value))
    }

    pub fn ip_address(value: &str) -> Result<Self> {
        value.trim().parse::<IpAddr>().map(Subject::IpAddress).map_err(
            |err| ModelError::InvalidSubject(format!("`{value}`: {err}")),
        )
    }

    /// Classify a raw identifier: anything that parses as an IP address is
    /// one, everything else is treated as a domain.
    pub fn classify(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        match trimmed.parse::<IpAddr>() {
            Ok(ip) => Ok(Subject::IpAddress(ip)),
            Err(_) => Subject::domain(trimmed),
        }
    }

    pub fn kind(&self) -> SubjectKind {
        match self {
            Subject::Domain(_) => SubjectKind::Domain,
            Subject::IpAddress(_) => SubjectKind::IpAddress,
        }
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, Subject::Domain(_))
    }

    pub fn value(&self) -> String {
        match self {
            Subject::Domain(domain) => domain.clone(),
            Subject::IpAddress(ip) => ip.to_string(),
        }
    }

    pub fn slug(&self) -> String {
        slugify(&self.value())
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Domain(domain) => f.write_str(domain),
            Subject::IpAddress(ip) => write!(f, "{ip}"),
        }
    }
}

/// Lowercase ASCII slug: alphanumeric runs joined by single hyphens.
///
/// Accented Latin letters lose their marks (`bücher.de` becomes
/// `bucher-de`); other non-ASCII characters are dropped. Input that leaves
/// nothing behind is hex-encoded so every subject still gets a key.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_hyphen = false;
    for ch in input.nfkd().filter(|ch| !is_combining_mark(*ch)) {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    if out.is_empty() {
        return hex::encode(input);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_matches_artifact_naming() {
        assert_eq!(slugify("example.com"), "example-com");
        assert_eq!(slugify("http://Example.com/"), "http-example-com");
        assert_eq!(slugify("10.0.0.1"), "10-0-0-1");
        assert_eq!(slugify("--a__b--"), "a-b");
    }

    #[test]
    fn slugify_folds_accents_and_never_returns_empty() {
        assert_eq!(slugify("bücher.de"), "bucher-de");
        assert_eq!(slugify("Ｅｘａｍｐｌｅ.com"), "example-com");
        assert_eq!(slugify("..."), "2e2e2e");
        assert_eq!(slugify("пример"), hex::encode("пример"));
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn classify_distinguishes_ip_from_domain() {
        assert_eq!(
            Subject::classify("10.0.0.1").unwrap().kind(),
            SubjectKind::IpAddress
        );
        assert_eq!(
            Subject::classify(" Example.COM ").unwrap(),
            Subject::Domain("example.com".into())
        );
        assert!(Subject::classify("").is_err());
    }
}
