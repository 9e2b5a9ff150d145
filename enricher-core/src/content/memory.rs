use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ContentKey, ContentStore};
use crate::error::{EnricherError, Result};

#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    blobs: RwLock<HashMap<ContentKey, Vec<u8>>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<ContentKey> {
        let mut keys: Vec<_> = self.blobs.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put(&self, key: &ContentKey, bytes: &[u8]) -> Result<()> {
        self.blobs.write().await.insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &ContentKey) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| EnricherError::NotFound(format!("content {key}")))
    }
}
