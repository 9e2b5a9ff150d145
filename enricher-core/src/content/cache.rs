use std::{
    fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;

use super::{ContentKey, ContentStore};
use crate::error::{EnricherError, Result};

/// Root directory managed by `cacache` (index + content-addressed blobs).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentRoot(PathBuf);

impl ContentRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Debug for ContentRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContentRoot").field(&self.0).finish()
    }
}

/// Content store on local disk, keyed by [`ContentKey`].
#[derive(Clone, Debug)]
pub struct CacacheContentStore {
    root: ContentRoot,
}

impl CacacheContentStore {
    pub fn new(root: ContentRoot) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &ContentRoot {
        &self.root
    }
}

#[async_trait]
impl ContentStore for CacacheContentStore {
    async fn put(&self, key: &ContentKey, bytes: &[u8]) -> Result<()> {
        let integrity =
            cacache::write(self.root.as_path(), key.as_str(), bytes).await?;
        tracing::trace!(key = %key, %integrity, "stored payload");
        Ok(())
    }

    async fn get(&self, key: &ContentKey) -> Result<Vec<u8>> {
        cacache::read(self.root.as_path(), key.as_str())
            .await
            .map_err(|e| match e {
                cacache::Error::EntryNotFound(_, _) => EnricherError::NotFound(
                    format!("content entry not found: {key}"),
                ),
                other => EnricherError::Cache(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use enricher_model::{BatchId, RecordKey, SequenceKey, StageName};

    use super::*;

    fn key() -> ContentKey {
        let record = RecordKey::new(
            BatchId::new("T1").unwrap(),
            SequenceKey::new("20250101000000000000").unwrap(),
        );
        ContentKey::new(&record, StageName::Whois, "example.com", "json")
    }

    #[tokio::test]
    async fn put_then_get_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacacheContentStore::new(ContentRoot::new(dir.path()));
        store.put(&key(), b"{\"ok\":true}").await.unwrap();
        assert_eq!(store.get(&key()).await.unwrap(), b"{\"ok\":true}");
    }

    #[tokio::test]
    async fn missing_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacacheContentStore::new(ContentRoot::new(dir.path()));
        let err = store.get(&key()).await.unwrap_err();
        assert!(matches!(err, EnricherError::NotFound(_)));
    }
}
