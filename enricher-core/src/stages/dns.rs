use std::{collections::BTreeSet, fmt};

use async_trait::async_trait;
use enricher_model::{DnsDetails, StageDetails, StageName, Subject};
use trust_dns_resolver::{
    TokioAsyncResolver,
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::{
        op::ResponseCode,
        rr::{RData, RecordType},
    },
};

use crate::worker::{Artifact, Stage, StageError, StageLookup};

/// Resolves A/AAAA, CNAME aliases and nameservers for a domain.
pub struct DnsStage {
    resolver: TokioAsyncResolver,
}

impl fmt::Debug for DnsStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsStage").finish_non_exhaustive()
    }
}

impl Default for DnsStage {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsStage {
    pub fn new() -> Self {
        Self::with_resolver(TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            ResolverOpts::default(),
        ))
    }

    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }

    async fn aliases(&self, domain: &str) -> Vec<String> {
        match self.resolver.lookup(domain, RecordType::CNAME).await {
            Ok(answer) => answer
                .iter()
                .filter_map(|rdata| match rdata {
                    RData::CNAME(name) => Some(trim_root(&name.to_string())),
                    _ => None,
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn nameservers(&self, domain: &str) -> Vec<String> {
        match self.resolver.ns_lookup(domain).await {
            Ok(answer) => answer
                .iter()
                .map(|ns| trim_root(&ns.to_string()))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Err(err) => {
                tracing::debug!(domain, error = %err, "nameserver lookup failed");
                Vec::new()
            }
        }
    }
}

fn trim_root(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}

/// Map resolver failures onto the stable DNS signatures.
pub fn resolve_error(err: &ResolveError) -> StageError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. }
            if *response_code == ResponseCode::NXDomain =>
        {
            StageError::NameNotResolved(err.to_string())
        }
        ResolveErrorKind::NoRecordsFound { .. } => {
            StageError::NoAddress(err.to_string())
        }
        ResolveErrorKind::Timeout => StageError::Timeout(err.to_string()),
        _ => StageError::Other(err.to_string()),
    }
}

#[async_trait]
impl Stage for DnsStage {
    fn name(&self) -> StageName {
        StageName::Dns
    }

    fn supports(&self, subject: &Subject) -> bool {
        subject.is_domain()
    }

    async fn lookup(
        &self,
        subject: &Subject,
    ) -> Result<StageLookup, StageError> {
        let Subject::Domain(domain) = subject else {
            return Err(StageError::Rejected(format!("{subject} is not a domain")));
        };

        let addresses: Vec<String> = self
            .resolver
            .lookup_ip(domain.as_str())
            .await
            .map_err(|err| resolve_error(&err))?
            .iter()
            .map(|ip| ip.to_string())
            .collect();

        let details = DnsDetails {
            hostname: domain.clone(),
            aliases: self.aliases(domain).await,
            addresses,
            nameservers: self.nameservers(domain).await,
        };
        let payload = serde_json::to_vec(&details)
            .map_err(|err| StageError::Other(err.to_string()))?;

        Ok(StageLookup {
            details: StageDetails::Dns(details),
            artifacts: vec![Artifact::json(subject, payload)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_subjects_are_unsupported() {
        let stage = DnsStage::new();
        let ip = Subject::ip_address("10.0.0.1").unwrap();
        assert!(!stage.supports(&ip));
        assert!(stage.supports(&Subject::domain("example.com").unwrap()));
    }

    #[test]
    fn root_dot_is_trimmed() {
        assert_eq!(trim_root("ns1.example.com."), "ns1.example.com");
    }
}
