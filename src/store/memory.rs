//! In-memory bucket for tests and broker-free runs.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{KeyValueBucket, Result};

#[derive(Default)]
pub struct MemoryBucket {
    entries: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueBucket for MemoryBucket {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
