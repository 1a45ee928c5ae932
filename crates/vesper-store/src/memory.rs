//! MemoryKv: an in-process `KeyValueStore`.
//!
//! Partitions are `BTreeMap`s keyed by sort key, so range queries come out
//! ordered for free. Expired items are kept until explicitly deleted, which
//! mirrors the lazy eviction of hosted stores.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::KvError;
use crate::kv::{KeyValueStore, KvItem};

/// Maximum sort keys accepted by one `batch_delete` call.
pub const MAX_BATCH_DELETE: usize = 25;

/// partition → (sort key → item)
type Partitions = BTreeMap<String, BTreeMap<String, KvItem>>;

/// In-memory key-value store.
///
/// Interior mutability via `parking_lot::Mutex`; every operation holds the
/// lock only for the duration of a map lookup or insert.
#[derive(Debug, Default)]
pub struct MemoryKv {
    partitions: Mutex<Partitions>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of items across all partitions.
    pub fn len(&self) -> usize {
        self.partitions.lock().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a partition in sort order.
    pub fn partition_items(&self, partition: &str) -> Vec<KvItem> {
        self.partitions
            .lock()
            .get(partition)
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Overwrite an item unconditionally. Used to seed fixtures.
    pub fn insert_raw(&self, item: KvItem) {
        self.partitions
            .lock()
            .entry(item.partition.clone())
            .or_default()
            .insert(item.sort.clone(), item);
    }
}

fn validate_keys(partition: &str, sort: Option<&str>) -> Result<(), KvError> {
    if partition.is_empty() {
        return Err(KvError::Validation("partition key must not be empty".to_string()));
    }
    if sort.is_some_and(str::is_empty) {
        return Err(KvError::Validation("sort key must not be empty".to_string()));
    }
    Ok(())
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn put_if_absent(&self, item: KvItem) -> Result<(), KvError> {
        validate_keys(&item.partition, Some(&item.sort))?;
        let mut partitions = self.partitions.lock();
        let partition = partitions.entry(item.partition.clone()).or_default();
        if partition.contains_key(&item.sort) {
            return Err(KvError::Conflict {
                partition: item.partition,
                sort_key: item.sort,
            });
        }
        partition.insert(item.sort.clone(), item);
        Ok(())
    }

    async fn query_partition(
        &self,
        partition: &str,
        limit: usize,
        ascending: bool,
    ) -> Result<Vec<KvItem>, KvError> {
        validate_keys(partition, None)?;
        let partitions = self.partitions.lock();
        let Some(items) = partitions.get(partition) else {
            return Ok(Vec::new());
        };
        let result = if ascending {
            items.values().take(limit).cloned().collect()
        } else {
            items.values().rev().take(limit).cloned().collect()
        };
        Ok(result)
    }

    async fn scan_partition(&self, partition: &str, cap: usize) -> Result<Vec<KvItem>, KvError> {
        validate_keys(partition, None)?;
        Ok(self
            .partitions
            .lock()
            .get(partition)
            .map(|p| p.values().take(cap).cloned().collect())
            .unwrap_or_default())
    }

    async fn batch_delete(&self, partition: &str, sort_keys: &[String]) -> Result<usize, KvError> {
        validate_keys(partition, None)?;
        if sort_keys.len() > MAX_BATCH_DELETE {
            return Err(KvError::Validation(format!(
                "batch delete accepts at most {} keys, got {}",
                MAX_BATCH_DELETE,
                sort_keys.len()
            )));
        }
        let mut partitions = self.partitions.lock();
        let Some(items) = partitions.get_mut(partition) else {
            return Ok(0);
        };
        let removed = sort_keys
            .iter()
            .filter(|key| items.remove(key.as_str()).is_some())
            .count();
        if items.is_empty() {
            partitions.remove(partition);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(partition: &str, sort: &str) -> KvItem {
        KvItem {
            partition: partition.to_string(),
            sort: sort.to_string(),
            body: json!({ "sort": sort }),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn put_if_absent_rejects_duplicates() {
        let kv = MemoryKv::new();
        kv.put_if_absent(item("s1", "a")).await.unwrap();
        let err = kv.put_if_absent(item("s1", "a")).await.unwrap_err();
        assert!(matches!(err, KvError::Conflict { .. }));
        assert_eq!(kv.len(), 1);
    }

    #[tokio::test]
    async fn same_sort_key_in_other_partition_is_fine() {
        let kv = MemoryKv::new();
        kv.put_if_absent(item("s1", "a")).await.unwrap();
        kv.put_if_absent(item("s2", "a")).await.unwrap();
        assert_eq!(kv.len(), 2);
    }

    #[tokio::test]
    async fn query_orders_by_sort_key() {
        let kv = MemoryKv::new();
        for sort in ["c", "a", "b"] {
            kv.put_if_absent(item("s1", sort)).await.unwrap();
        }
        let asc = kv.query_partition("s1", 10, true).await.unwrap();
        let sorts: Vec<&str> = asc.iter().map(|i| i.sort.as_str()).collect();
        assert_eq!(sorts, ["a", "b", "c"]);

        let desc = kv.query_partition("s1", 2, false).await.unwrap();
        let sorts: Vec<&str> = desc.iter().map(|i| i.sort.as_str()).collect();
        assert_eq!(sorts, ["c", "b"]);
    }

    #[tokio::test]
    async fn query_missing_partition_is_empty() {
        let kv = MemoryKv::new();
        assert!(kv.query_partition("nope", 10, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_keys() {
        let kv = MemoryKv::new();
        assert!(matches!(
            kv.put_if_absent(item("", "a")).await,
            Err(KvError::Validation(_))
        ));
        assert!(matches!(
            kv.put_if_absent(item("s1", "")).await,
            Err(KvError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn batch_delete_counts_and_ignores_missing() {
        let kv = MemoryKv::new();
        kv.put_if_absent(item("s1", "a")).await.unwrap();
        kv.put_if_absent(item("s1", "b")).await.unwrap();
        let removed = kv
            .batch_delete("s1", &["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(kv.partition_items("s1").len(), 1);
    }

    #[tokio::test]
    async fn batch_delete_enforces_limit() {
        let kv = MemoryKv::new();
        let keys: Vec<String> = (0..=MAX_BATCH_DELETE).map(|i| i.to_string()).collect();
        assert!(matches!(
            kv.batch_delete("s1", &keys).await,
            Err(KvError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn scan_respects_cap() {
        let kv = MemoryKv::new();
        for i in 0..10 {
            kv.put_if_absent(item("s1", &format!("{:02}", i))).await.unwrap();
        }
        assert_eq!(kv.scan_partition("s1", 4).await.unwrap().len(), 4);
    }
}
