//! Concrete stage providers.
//!
//! Each stage performs one kind of lookup and maps provider failures onto
//! [`StageError`](crate::worker::StageError). Everything else (retry,
//! classification, persistence, acknowledgement) is the worker's job.

pub mod archive;
pub mod cert;
pub mod content;
pub mod dns;
pub mod reputation;
pub mod whois;

use std::sync::Arc;

use tracing::warn;

use crate::{
    config::ProviderSettings,
    error::Result,
    worker::{Stage, StageError},
};

pub use archive::ArchiveStage;
pub use cert::CertStage;
pub use content::ContentStage;
pub use dns::DnsStage;
pub use reputation::ReputationStage;
pub use whois::WhoisStage;

/// Shared HTTP client for provider requests.
pub fn http_client(settings: &ProviderSettings) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(settings.request_timeout())
        .user_agent(settings.user_agent.clone())
        .build()?)
}

/// Every stage that has a worker in this binary. The reputation stage is
/// left out when no API key is configured; its queue keeps accumulating
/// until one is.
pub fn default_stages(
    settings: &ProviderSettings,
) -> Result<Vec<Arc<dyn Stage>>> {
    let client = http_client(settings)?;
    let mut stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(DnsStage::new()),
        Arc::new(WhoisStage::new(client.clone(), &settings.rdap_base)),
        Arc::new(CertStage::new(client.clone(), &settings.crtsh_base)),
        Arc::new(ContentStage::new(settings)?),
        Arc::new(ArchiveStage::new(client.clone(), &settings.archive_base)),
    ];
    match &settings.reputation_api_key {
        Some(key) if !key.trim().is_empty() => {
            stages.push(Arc::new(ReputationStage::new(
                client,
                &settings.reputation_base,
                key.clone(),
            )));
        }
        _ => warn!("no reputation API key configured; vt stage disabled"),
    }
    Ok(stages)
}

/// Fail a lookup whose provider answered with a non-success status.
pub(crate) fn check_status(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, StageError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(StageError::from_status(status))
    }
}
