//! Key-value record persistence.
//!
//! `KeyValueBucket` is the raw byte-level seam (NATS KV or an in-memory
//! map); `RecordStore` layers JSON codec and typed access on top of it.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod memory;
pub mod nats;

pub use memory::MemoryBucket;
pub use nats::NatsKvBucket;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing bucket rejected the operation.
    #[error("bucket operation failed: {0}")]
    Bucket(String),

    #[error("record codec failed: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A flat keyspace of opaque byte values.
#[async_trait]
pub trait KeyValueBucket: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Typed store of JSON records over a byte bucket.
///
/// A record may be indexed under more than one key (e.g. a transaction by
/// its own id and by the order it belongs to), so `values` deduplicates.
pub struct RecordStore<T> {
    bucket: Arc<dyn KeyValueBucket>,
    _record: PhantomData<fn() -> T>,
}

impl<T> RecordStore<T>
where
    T: Serialize + DeserializeOwned + PartialEq,
{
    pub fn new(bucket: Arc<dyn KeyValueBucket>) -> Self {
        Self {
            bucket,
            _record: PhantomData,
        }
    }

    /// Fetch a record by key. An empty key is treated as absent rather than
    /// sent to the bucket, which would reject it.
    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        if key.is_empty() {
            return Ok(None);
        }
        match self.bucket.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, key: &str, record: &T) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.bucket.put(key, bytes.into()).await
    }

    /// All distinct records in the bucket.
    pub async fn values(&self) -> Result<Vec<T>> {
        let mut records: Vec<T> = Vec::new();
        for key in self.bucket.keys().await? {
            if let Some(record) = self.get(&key).await? {
                if !records.contains(&record) {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.bucket.keys().await?.is_empty())
    }
}
