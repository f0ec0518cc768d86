//! NATS JetStream key-value bucket.

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::info;

use super::{KeyValueBucket, Result, StoreError};

/// Record bucket backed by a JetStream KV store.
pub struct NatsKvBucket {
    store: kv::Store,
}

impl NatsKvBucket {
    /// Open the named bucket, creating it with file storage if missing.
    pub async fn ensure(jetstream: &jetstream::Context, bucket: &str) -> Result<Self> {
        let store = match jetstream.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => {
                let store = jetstream
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        storage: jetstream::stream::StorageType::File,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| {
                        StoreError::Bucket(format!("Failed to create bucket {}: {}", bucket, e))
                    })?;
                info!(bucket = %bucket, "Key-value bucket created");
                store
            }
        };
        Ok(Self { store })
    }
}

#[async_trait]
impl KeyValueBucket for NatsKvBucket {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.store
            .get(key)
            .await
            .map_err(|e| StoreError::Bucket(format!("Failed to get {}: {}", key, e)))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.store
            .put(key, value)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Bucket(format!("Failed to put {}: {}", key, e)))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut stream = self
            .store
            .keys()
            .await
            .map_err(|e| StoreError::Bucket(format!("Failed to list keys: {}", e)))?;

        let mut keys = Vec::new();
        while let Some(next) = stream.next().await {
            keys.push(next.map_err(|e| StoreError::Bucket(format!("Failed to read key: {}", e)))?);
        }
        Ok(keys)
    }
}
