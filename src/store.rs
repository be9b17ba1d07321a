//! The `PersistedStore` contract (spec §6.1) — the sole collaborator the
//! cache layer depends on for persistence. Concrete backends (file/SQL/
//! IndexedDB) are out of scope per the spec; this module defines the trait
//! and ships one reference implementation, [`InMemoryStore`], used by tests
//! and as a drop-in default for consumers without a real backend.
//!
//! Grounded in the teacher's `QueryPersister` trait (`query_persister/mod.rs`):
//! an `#[async_trait]` with a handful of narrow operations, implemented for
//! a `Clone`-able handle type so the same persister can be shared across
//! every query in a client.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

/// Key-value plus named-record-store persistence, per spec §6.1. All
/// operations are asynchronous; implementations are expected to be cheap to
/// clone (an `Arc` internally) since the cache layer holds one handle per
/// [`QueryClient`](crate::QueryClient).
#[async_trait(?Send)]
pub trait PersistedStore {
    async fn init(&self) {}

    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String);
    async fn delete(&self, key: &str);
    async fn clear(&self);

    async fn get_record(&self, store: &str, id: &str) -> Option<Value>;
    async fn set_record(&self, store: &str, id: &str, data: Value);
    async fn delete_record(&self, store: &str, id: &str);

    async fn get_records(&self, store: &str) -> Vec<Value>;
    /// Replaces the entire contents of `store`.
    async fn set_records(&self, store: &str, records: Vec<Value>);
    async fn delete_records(&self, store: &str, ids: &[String]);
    async fn clear_store(&self, store: &str);
}

/// A `HashMap`-backed [`PersistedStore`] with no actual durability. Suitable
/// for tests and as the default store a [`QueryClient`](crate::QueryClient)
/// is initialized with when no real backend is wired up.
#[derive(Default)]
pub struct InMemoryStore {
    scalars: Mutex<HashMap<String, String>>,
    records: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait(?Send)]
impl PersistedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.scalars.lock().unwrap().get(key).cloned()
    }

    async fn set(&self, key: &str, value: String) {
        self.scalars.lock().unwrap().insert(key.to_string(), value);
    }

    async fn delete(&self, key: &str) {
        self.scalars.lock().unwrap().remove(key);
    }

    async fn clear(&self) {
        self.scalars.lock().unwrap().clear();
        self.records.lock().unwrap().clear();
    }

    async fn get_record(&self, store: &str, id: &str) -> Option<Value> {
        self.records
            .lock()
            .unwrap()
            .get(store)
            .and_then(|m| m.get(id))
            .cloned()
    }

    async fn set_record(&self, store: &str, id: &str, data: Value) {
        self.records
            .lock()
            .unwrap()
            .entry(store.to_string())
            .or_default()
            .insert(id.to_string(), data);
    }

    async fn delete_record(&self, store: &str, id: &str) {
        if let Some(m) = self.records.lock().unwrap().get_mut(store) {
            m.remove(id);
        }
    }

    async fn get_records(&self, store: &str) -> Vec<Value> {
        self.records
            .lock()
            .unwrap()
            .get(store)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn set_records(&self, store: &str, records: Vec<Value>) {
        let mut guard = self.records.lock().unwrap();
        let slot = guard.entry(store.to_string()).or_default();
        slot.clear();
        for record in records {
            if let Some(id) = record.get("id").and_then(Value::as_str) {
                slot.insert(id.to_string(), record);
            }
        }
    }

    async fn delete_records(&self, store: &str, ids: &[String]) {
        if let Some(m) = self.records.lock().unwrap().get_mut(store) {
            for id in ids {
                m.remove(id);
            }
        }
    }

    async fn clear_store(&self, store: &str) {
        self.records.lock().unwrap().remove(store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scalar_roundtrip() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("a").await, None);
        store.set("a", "1".into()).await;
        assert_eq!(store.get("a").await, Some("1".into()));
        store.delete("a").await;
        assert_eq!(store.get("a").await, None);
    }

    #[tokio::test]
    async fn record_store_replace() {
        let store = InMemoryStore::new();
        let records = vec![
            serde_json::json!({"id": "1", "title": "a"}),
            serde_json::json!({"id": "2", "title": "b"}),
        ];
        store.set_records("posts", records).await;
        assert_eq!(store.get_records("posts").await.len(), 2);
        store.delete_records("posts", &["1".to_string()]).await;
        assert_eq!(store.get_records("posts").await.len(), 1);
        store.clear_store("posts").await;
        assert_eq!(store.get_records("posts").await.len(), 0);
    }
}
