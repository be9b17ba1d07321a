//! The cache layer of spec §4.2: read/write of `(raw payload, timestamp)`
//! per [`QueryKey`] on a [`PersistedStore`], with a granular per-record
//! variant for list data. Grounded in the teacher's `PersistQueryData`
//! (`query_persister/mod.rs`) — a `(value: String, updated_at: u64)` envelope
//! — generalized from the teacher's single web-storage string slot to the
//! spec's richer key-value-plus-record-store contract.
//!
//! Cache writes are best-effort: a failed or unparsable persisted read/write
//! never fails the caller, because in-memory state is the source of truth
//! for observers (spec §4.2, §7).

use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{QueryError, QueryErrorKind};
use crate::instant::Instant;
use crate::key::QueryKey;
use crate::store::PersistedStore;

/// Capability required of elements stored in granular mode: a stable string
/// id, so that each element maps to exactly one persistent record (spec's
/// `HasId`).
pub trait HasId {
    fn id(&self) -> String;
}

fn data_slot(key: &QueryKey) -> String {
    format!("query_data_{}", key.as_str_key())
}

fn time_slot(key: &QueryKey) -> String {
    format!("query_time_{}", key.as_str_key())
}

/// Record-store name for granular-mode lists. Derived from the key, same as
/// the blob data slot (spec §4.2: "the store name being derived from the
/// key").
fn record_store(key: &QueryKey) -> String {
    data_slot(key)
}

/// Encode a payload for the blob slot. Primitive scalars (string/number/
/// bool) are stored verbatim rather than JSON-quoted, to avoid unnecessary
/// serialization noise for the common case of a bare string/int/float/bool
/// payload (spec §4.2).
fn encode_blob<T: Serialize>(value: &T) -> Result<String, QueryError> {
    let json = serde_json::to_value(value)
        .map_err(|e| QueryError::new(QueryErrorKind::Parsing, e.to_string()))?;
    Ok(match json {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    })
}

/// Decode a blob slot. Always attempts a typed decode of `raw` as JSON
/// first (covers objects/arrays and JSON-encoded scalars); if that fails,
/// falls back to treating the whole string as a verbatim JSON string
/// literal, recovering the primitive-payload case `encode_blob` produces.
fn decode_blob<T: DeserializeOwned>(raw: &str) -> Result<T, QueryError> {
    if let Ok(v) = serde_json::from_str::<T>(raw) {
        return Ok(v);
    }
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|e| QueryError::new(QueryErrorKind::Parsing, e.to_string()))
}

/// Thin façade over a [`PersistedStore`] implementing the blob/granular
/// slot layout. Cheap to clone — holds an `Rc` to the underlying store.
pub struct CacheLayer<S> {
    store: Rc<S>,
}

impl<S> Clone for CacheLayer<S> {
    fn clone(&self) -> Self {
        CacheLayer {
            store: self.store.clone(),
        }
    }
}

impl<S: PersistedStore> CacheLayer<S> {
    pub fn new(store: Rc<S>) -> Self {
        CacheLayer { store }
    }

    pub fn store(&self) -> &Rc<S> {
        &self.store
    }

    async fn read_time(&self, key: &QueryKey) -> Option<Instant> {
        let raw = self.store.get(&time_slot(key)).await?;
        raw.parse::<u64>().ok().map(Instant::from_millis)
    }

    async fn write_time(&self, key: &QueryKey, at: Instant) {
        self.store.set(&time_slot(key), at.as_millis().to_string()).await;
    }

    /// Blob-mode read: decode the `query_data_<key>` slot as `T`, paired
    /// with its `query_time_<key>` timestamp. `None` if either is missing or
    /// malformed — a best-effort miss, never an error, per spec §4.2/§7.
    pub async fn get_cached_blob<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<(T, Instant)> {
        let raw = self.store.get(&data_slot(key)).await?;
        let time = self.read_time(key).await?;
        match decode_blob::<T>(&raw) {
            Ok(value) => Some((value, time)),
            Err(err) => {
                tracing::debug!(?key, error = %err, "failed to decode cached blob, treating as cache miss");
                None
            }
        }
    }

    /// Blob-mode write. Errors are logged and swallowed: the cache is
    /// best-effort.
    pub async fn set_cached_blob<T: Serialize>(&self, key: &QueryKey, value: &T, at: Instant) {
        match encode_blob(value) {
            Ok(raw) => {
                self.store.set(&data_slot(key), raw).await;
                self.write_time(key, at).await;
            }
            Err(err) => {
                tracing::warn!(?key, error = %err, "failed to encode value for cache write, skipping");
            }
        }
    }

    /// Granular-mode read: loads every record in `key`'s derived store and
    /// decodes each as `T`, paired with the entry's timestamp.
    pub async fn get_cached_granular<T: DeserializeOwned + HasId>(
        &self,
        key: &QueryKey,
    ) -> Option<(Vec<T>, Instant)> {
        let time = self.read_time(key).await?;
        let records = self.store.get_records(&record_store(key)).await;
        if records.is_empty() {
            return None;
        }
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::from_value::<T>(record) {
                Ok(item) => items.push(item),
                Err(err) => {
                    tracing::debug!(?key, error = %err, "failed to decode granular record, skipping");
                }
            }
        }
        Some((items, time))
    }

    /// Granular-mode write: replaces the entire record store with `items`.
    pub async fn set_cached_granular<T: Serialize + HasId>(
        &self,
        key: &QueryKey,
        items: &[T],
        at: Instant,
    ) {
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::to_value(item) {
                Ok(mut value) => {
                    if let Value::Object(ref mut map) = value {
                        map.insert("id".to_string(), Value::String(item.id()));
                    }
                    records.push(value);
                }
                Err(err) => {
                    tracing::warn!(?key, error = %err, "failed to encode granular record, skipping");
                }
            }
        }
        self.store.set_records(&record_store(key), records).await;
        self.write_time(key, at).await;
    }

    /// Write exactly one record in a granular-mode store (invariant 6 of
    /// spec §3: granular mutations touch exactly one persistent record).
    pub async fn set_one_record<T: Serialize + HasId>(&self, key: &QueryKey, item: &T) {
        if let Ok(mut value) = serde_json::to_value(item) {
            if let Value::Object(ref mut map) = value {
                map.insert("id".to_string(), Value::String(item.id()));
            }
            self.store.set_record(&record_store(key), &item.id(), value).await;
        }
    }

    pub async fn delete_one_record(&self, key: &QueryKey, id: &str) {
        self.store.delete_record(&record_store(key), id).await;
    }

    /// Untyped granular read, for callers (`Query`) that only hold a
    /// caller-supplied id/record codec rather than a static `HasId` bound.
    pub async fn get_cached_granular_raw(&self, key: &QueryKey) -> Option<(Vec<Value>, Instant)> {
        let time = self.read_time(key).await?;
        let records = self.store.get_records(&record_store(key)).await;
        if records.is_empty() {
            return None;
        }
        Some((records, time))
    }

    /// Untyped granular write: replaces the record store with `records`,
    /// tagging each with its id.
    pub async fn set_cached_granular_raw(&self, key: &QueryKey, records: Vec<(String, Value)>, at: Instant) {
        let mut tagged = Vec::with_capacity(records.len());
        for (id, mut value) in records {
            if let Value::Object(ref mut map) = value {
                map.insert("id".to_string(), Value::String(id));
            }
            tagged.push(value);
        }
        self.store.set_records(&record_store(key), tagged).await;
        self.write_time(key, at).await;
    }

    /// Untyped single-record write (invariant 6: granular mutations touch
    /// exactly one persistent record).
    pub async fn set_one_record_raw(&self, key: &QueryKey, id: &str, mut value: Value) {
        if let Value::Object(ref mut map) = value {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        self.store.set_record(&record_store(key), id, value).await;
    }

    /// Purges both the data and time slots for `key`, including the
    /// granular record store if present. Used by `removeQueries`/
    /// `disposeQuery` (DESIGN.md Open Question 1).
    pub async fn purge(&self, key: &QueryKey) {
        self.store.delete(&data_slot(key)).await;
        self.store.delete(&time_slot(key)).await;
        self.store.clear_store(&record_store(key)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Post {
        id: String,
        title: String,
    }

    impl HasId for Post {
        fn id(&self) -> String {
            self.id.clone()
        }
    }

    fn cache() -> CacheLayer<InMemoryStore> {
        CacheLayer::new(Rc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn blob_roundtrip() {
        let cache = cache();
        let key = QueryKey::from(["posts"]);
        let posts = vec![Post { id: "1".into(), title: "a".into() }];
        cache.set_cached_blob(&key, &posts, Instant::now()).await;
        let (loaded, _time): (Vec<Post>, Instant) = cache.get_cached_blob(&key).await.unwrap();
        assert_eq!(loaded, posts);
    }

    #[tokio::test]
    async fn primitive_blob_is_verbatim() {
        let cache = cache();
        let key = QueryKey::from(["count"]);
        cache.set_cached_blob(&key, &"v1".to_string(), Instant::now()).await;
        let raw = cache.store().get("query_data_count").await.unwrap();
        assert_eq!(raw, "v1");
        let (loaded, _): (String, Instant) = cache.get_cached_blob(&key).await.unwrap();
        assert_eq!(loaded, "v1");
    }

    #[tokio::test]
    async fn granular_roundtrip() {
        let cache = cache();
        let key = QueryKey::from(["posts"]);
        let posts = vec![
            Post { id: "1".into(), title: "a".into() },
            Post { id: "2".into(), title: "b".into() },
        ];
        cache.set_cached_granular(&key, &posts, Instant::now()).await;
        let (loaded, _): (Vec<Post>, Instant) = cache.get_cached_granular(&key).await.unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn granular_update_touches_one_record() {
        let cache = cache();
        let key = QueryKey::from(["posts"]);
        let posts: Vec<Post> = (0..10)
            .map(|i| Post { id: i.to_string(), title: format!("t{i}") })
            .collect();
        cache.set_cached_granular(&key, &posts, Instant::now()).await;

        let updated = Post { id: "5".into(), title: "updated".into() };
        cache.set_one_record(&key, &updated).await;

        let store_name = record_store(&key);
        let record = cache.store().get_record(&store_name, "5").await.unwrap();
        assert_eq!(record["title"], "updated");

        // Other records are untouched.
        let other = cache.store().get_record(&store_name, "3").await.unwrap();
        assert_eq!(other["title"], "t3");
    }

    #[tokio::test]
    async fn purge_removes_blob_time_and_granular_store() {
        let cache = cache();
        let key = QueryKey::from(["posts"]);
        cache.set_cached_blob(&key, &"v1".to_string(), Instant::now()).await;
        cache.purge(&key).await;
        assert!(cache.store().get("query_data_posts").await.is_none());
        assert!(cache.store().get("query_time_posts").await.is_none());
    }
}
