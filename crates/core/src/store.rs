//! Write-through annotation store.
//!
//! Caches the last-known raw payload of each annotation, keyed by id, so
//! that metadata re-reads after a local write do not need a round trip.
//! Each backend source owns its own store; there is no global instance.
//!
//! All mutations are synchronous and complete before any network call is
//! issued, so for a given id the latest local write always wins.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde_json::Value;

#[derive(Debug, Default)]
pub struct AnnotationStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the payload for `id`. Empty ids are ignored.
    pub fn add(&self, id: &str, value: Value) {
        if id.is_empty() {
            return;
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), value);
    }

    /// Alias for [`add`](Self::add): last write wins.
    pub fn update(&self, id: &str, value: Value) {
        self.add(id, value);
    }

    /// Remove the entry for `id`, returning the previous payload.
    pub fn remove(&self, id: &str) -> Option<Value> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
