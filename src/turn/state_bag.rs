//! Turn-scoped key/value bags.
//!
//! A [`StateBag`] carries per-turn services (connector client, claims
//! identity) and cross-cutting flags (buffered invoke responses). Values are
//! type-erased; reads downcast back to the concrete type.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Entry = Arc<dyn Any + Send + Sync>;

/// A string-keyed bag of type-erased values, shared for the lifetime of one
/// turn.
///
/// Only one logical flow touches a turn's state, so the internal mutex is
/// held for map access only, never across await points.
#[derive(Default)]
pub struct StateBag {
    entries: Mutex<HashMap<String, Entry>>,
}

impl StateBag {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.entries().insert(key.to_string(), Arc::new(value));
    }

    /// Returns the value under `key` if present and of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.entries()
            .get(key)
            .cloned()
            .and_then(|entry| entry.downcast::<T>().ok())
    }

    /// Returns the value under `key`, inserting the result of `init` first
    /// when the key is absent.
    pub fn get_or_insert_with<T, F>(&self, key: &str, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(key).cloned()
            && let Ok(typed) = existing.downcast::<T>()
        {
            return typed;
        }
        let created: Arc<T> = Arc::new(init());
        entries.insert(key.to_string(), created.clone());
        created
    }

    /// Removes and returns the value under `key`.
    pub fn remove<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.entries()
            .remove(key)
            .and_then(|entry| entry.downcast::<T>().ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Releases every value in the bag.
    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl std::fmt::Debug for StateBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.entries().keys().cloned().collect();
        f.debug_struct("StateBag").field("keys", &keys).finish()
    }
}
