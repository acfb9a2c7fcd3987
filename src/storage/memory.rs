//! In-memory store for tests and ephemeral runs.

use std::collections::BTreeMap;

use futures_util::future::BoxFuture;
use tokio::sync::RwLock;

use super::{Store, StoreError, validate_key};

/// Store backed by an ordered map.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, StoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            validate_key(&key)?;
            Ok(self.entries.read().await.get(&key).cloned())
        })
    }

    fn put(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), StoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            validate_key(&key)?;
            self.entries.write().await.insert(key, value);
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), StoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            validate_key(&key)?;
            self.entries.write().await.remove(&key);
            Ok(())
        })
    }

    fn scan_prefix(&self, prefix: &str) -> BoxFuture<'_, Result<Vec<(String, Vec<u8>)>, StoreError>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let store = MemoryStore::new();
        assert!(store.get("a/1").await.unwrap().is_none());
        store.put("a/1", vec![1]).await.unwrap();
        store.put("a/1", vec![2]).await.unwrap();
        assert_eq!(store.get("a/1").await.unwrap(), Some(vec![2]));
        assert_eq!(store.len().await, 1);
        store.delete("a/1").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_scan_prefix_is_bounded() {
        let store = MemoryStore::new();
        for key in ["a/2", "a/1", "ab/1", "b/1"] {
            store.put(key, key.as_bytes().to_vec()).await.unwrap();
        }
        let keys: Vec<String> = store.scan_prefix("a/").await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a/1".to_string(), "a/2".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_invalid_key() {
        let store = MemoryStore::new();
        assert!(matches!(store.put("../etc", vec![]).await, Err(StoreError::InvalidKey(_))));
    }
}
