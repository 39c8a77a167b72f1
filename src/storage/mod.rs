//! The key/value state collaborator interface.
//!
//! Dialog stacks and other turn-scoped properties are persisted as JSON
//! values under opaque string keys with optimistic-concurrency ETags. This
//! crate only requires load-before-use and save-after-mutation semantics;
//! the storage implementation itself is a host concern. An in-process
//! [`MemoryStorage`] is provided for tests and single-node hosts.

mod state;

pub use state::{AutoSaveStateMiddleware, ConversationState};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Errors raised by storage implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The item changed since it was read; the held ETag no longer matches.
    #[error("etag conflict writing key '{key}': held {held:?}, current {current:?}")]
    EtagConflict {
        key: String,
        held: Option<String>,
        current: Option<String>,
    },

    /// Storage keys must be non-empty.
    #[error("storage key must not be empty")]
    EmptyKey,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error from the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A backend-specific failure.
    #[error("storage error: {0}")]
    Other(String),
}

/// A stored value plus the ETag it was read with.
///
/// Writing with `etag: None` or `etag: Some("*")` overwrites unconditionally;
/// any other ETag must match the stored one or the write fails with
/// [`StorageError::EtagConflict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreItem {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl StoreItem {
    pub fn new(value: Value) -> Self {
        Self { value, etag: None }
    }

    pub fn with_etag(value: Value, etag: impl Into<String>) -> Self {
        Self {
            value,
            etag: Some(etag.into()),
        }
    }
}

/// The storage collaborator: batched reads and writes keyed by opaque
/// strings.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads the requested keys. Missing keys are simply absent from the
    /// result.
    async fn read(&self, keys: &[String]) -> Result<HashMap<String, StoreItem>, StorageError>;

    /// Writes a batch of changes, honoring each item's ETag.
    async fn write(&self, changes: HashMap<String, StoreItem>) -> Result<(), StorageError>;

    /// Deletes the given keys. Deleting an absent key is not an error.
    async fn delete(&self, keys: &[String]) -> Result<(), StorageError>;
}

/// In-process storage with monotonic ETags.
#[derive(Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, (Value, u64)>>,
    counter: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Value, u64)>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, keys: &[String]) -> Result<HashMap<String, StoreItem>, StorageError> {
        let items = self.items();
        let mut result = HashMap::new();
        for key in keys {
            if key.is_empty() {
                return Err(StorageError::EmptyKey);
            }
            if let Some((value, etag)) = items.get(key) {
                result.insert(
                    key.clone(),
                    StoreItem::with_etag(value.clone(), etag.to_string()),
                );
            }
        }
        Ok(result)
    }

    async fn write(&self, changes: HashMap<String, StoreItem>) -> Result<(), StorageError> {
        let mut items = self.items();
        for (key, item) in changes {
            if key.is_empty() {
                return Err(StorageError::EmptyKey);
            }
            let current = items.get(&key).map(|(_, etag)| etag.to_string());
            match item.etag.as_deref() {
                None | Some("*") => {}
                Some(held) if Some(held) == current.as_deref() => {}
                Some(held) => {
                    return Err(StorageError::EtagConflict {
                        key,
                        held: Some(held.to_string()),
                        current,
                    });
                }
            }
            let next = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            items.insert(key, (item.value, next));
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut items = self.items();
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn changes(key: &str, item: StoreItem) -> HashMap<String, StoreItem> {
        HashMap::from([(key.to_string(), item)])
    }

    #[tokio::test]
    async fn test_read_missing_key_is_absent() {
        let storage = MemoryStorage::new();
        let result = storage.read(&["missing".to_string()]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let storage = MemoryStorage::new();
        storage
            .write(changes("k", StoreItem::new(json!({"n": 1}))))
            .await
            .unwrap();

        let result = storage.read(&["k".to_string()]).await.unwrap();
        let item = result.get("k").expect("item present");
        assert_eq!(item.value, json!({"n": 1}));
        assert!(item.etag.is_some(), "reads return the current etag");
    }

    #[tokio::test]
    async fn test_stale_etag_is_rejected() {
        let storage = MemoryStorage::new();
        storage
            .write(changes("k", StoreItem::new(json!(1))))
            .await
            .unwrap();
        let held = storage.read(&["k".to_string()]).await.unwrap()["k"]
            .etag
            .clone()
            .unwrap();

        // A second writer bumps the etag.
        storage
            .write(changes("k", StoreItem::with_etag(json!(2), held.clone())))
            .await
            .unwrap();

        let err = storage
            .write(changes("k", StoreItem::with_etag(json!(3), held)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EtagConflict { .. }));
    }

    #[tokio::test]
    async fn test_wildcard_etag_overwrites() {
        let storage = MemoryStorage::new();
        storage
            .write(changes("k", StoreItem::new(json!(1))))
            .await
            .unwrap();
        storage
            .write(changes("k", StoreItem::with_etag(json!(2), "*")))
            .await
            .unwrap();

        let result = storage.read(&["k".to_string()]).await.unwrap();
        assert_eq!(result["k"].value, json!(2));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let storage = MemoryStorage::new();
        storage
            .write(changes("k", StoreItem::new(json!(1))))
            .await
            .unwrap();
        storage.delete(&["k".to_string()]).await.unwrap();
        storage.delete(&["k".to_string()]).await.unwrap();

        let result = storage.read(&["k".to_string()]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let storage = MemoryStorage::new();
        let err = storage
            .write(changes("", StoreItem::new(json!(1))))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EmptyKey));
    }
}
