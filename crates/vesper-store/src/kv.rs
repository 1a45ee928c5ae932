//! Durable key-value collaborator.
//!
//! Items live under a partition key and are ordered by a sort key within the
//! partition. The only concurrency control is `put_if_absent`, which fails
//! with `KvError::Conflict` when the (partition, sort) pair already exists.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KvError;

/// One stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvItem {
    pub partition: String,
    pub sort: String,
    pub body: Value,
    /// Unix seconds after which the store may evict the item. Eviction is
    /// eventually consistent, so readers must filter expired items themselves.
    pub expires_at: Option<i64>,
}

/// User-implemented storage backend (DynamoDB-style table, SQL, in-memory).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Insert `item` only if no item with the same partition and sort key exists.
    async fn put_if_absent(&self, item: KvItem) -> Result<(), KvError>;

    /// Up to `limit` items of a partition, ordered by sort key.
    async fn query_partition(
        &self,
        partition: &str,
        limit: usize,
        ascending: bool,
    ) -> Result<Vec<KvItem>, KvError>;

    /// Up to `cap` items of a partition in no guaranteed order.
    async fn scan_partition(&self, partition: &str, cap: usize) -> Result<Vec<KvItem>, KvError>;

    /// Delete the given sort keys from a partition. Missing keys are ignored.
    /// Returns how many items were removed.
    async fn batch_delete(&self, partition: &str, sort_keys: &[String]) -> Result<usize, KvError>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<(), KvError> {
        Ok(())
    }
}
