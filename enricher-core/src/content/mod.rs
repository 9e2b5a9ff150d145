//! Raw provider payloads, addressed by record identity and stage.

pub mod cache;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use enricher_model::{RecordKey, StageName, slugify};

use crate::error::Result;

pub use cache::{CacacheContentStore, ContentRoot};
pub use memory::InMemoryContentStore;

/// Location of one raw payload: `{batch}/{stage}/{slug}_{sequence}.{ext}`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey(String);

impl ContentKey {
    pub fn new(
        record: &RecordKey,
        stage: StageName,
        slug_source: &str,
        extension: &str,
    ) -> Self {
        Self(format!(
            "{}/{}/{}_{}.{}",
            record.batch_id,
            stage,
            slugify(slug_source),
            record.sequence_key,
            extension
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentKey").field(&self.0).finish()
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous payload.
    async fn put(&self, key: &ContentKey, bytes: &[u8]) -> Result<()>;

    async fn get(&self, key: &ContentKey) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use enricher_model::{BatchId, SequenceKey};

    use super::*;

    #[test]
    fn key_follows_batch_stage_slug_layout() {
        let record = RecordKey::new(
            BatchId::new("T1").unwrap(),
            SequenceKey::new("20250101000000000000").unwrap(),
        );
        let key = ContentKey::new(&record, StageName::Dns, "example.com", "json");
        assert_eq!(key.as_str(), "T1/dns/example-com_20250101000000000000.json");

        let html = ContentKey::new(
            &record,
            StageName::Content,
            "https://example.com",
            "html",
        );
        assert_eq!(
            html.as_str(),
            "T1/html/https-example-com_20250101000000000000.html"
        );
    }
}
