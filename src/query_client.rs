//! The `QueryClient` registry (spec §4.6): creation/reuse keyed by
//! `QueryKey`, prefix invalidation, optimistic granular list helpers,
//! hydration coordination, and teardown. Grounded in the teacher's
//! `query_client.rs`, generalized from its `(TypeId, TypeId)`-keyed
//! `QueryCache` to a plain `QueryKey`-keyed registry (the spec's invariant 1
//! is "exactly one entry per key", not "one entry per key-per-type"), using
//! the same `Rc<dyn Any>` downcast trick the teacher's cache uses to erase
//! the `<TData, TRaw>` type parameters across entries.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::cache::{CacheLayer, HasId};
use crate::error::QueryError;
use crate::infinite_query::{InfiniteQuery, PageParamFns};
use crate::key::QueryKey;
use crate::mutation::{Mutation, MutationCallbacks, MutationFn};
use crate::query::{FetchFn, LocalBoxFuture, Query};
use crate::query_options::{DefaultQueryOptions, QueryOptions};
use crate::store::PersistedStore;
use crate::util;

/// Type-erased operations every registered `Query` supports, independent of
/// its `<TRaw, TData>` parameters — what `invalidateQueries`/`removeQueries`/
/// `waitForHydration` need to act across a heterogeneous registry.
trait ErasedQueryEntry {
    fn key(&self) -> &QueryKey;
    fn is_disposed(&self) -> bool;
    fn dispose(&self);
    fn invalidate(self: Rc<Self>) -> LocalBoxFuture<()>;
    fn wait_for_hydration(self: Rc<Self>) -> LocalBoxFuture<()>;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<S, TRaw, TData> ErasedQueryEntry for Query<S, TRaw, TData>
where
    S: PersistedStore + 'static,
    TRaw: serde::Serialize + serde::de::DeserializeOwned + 'static,
    TData: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
{
    fn key(&self) -> &QueryKey {
        Query::key(self)
    }

    fn is_disposed(&self) -> bool {
        Query::is_disposed(self)
    }

    fn dispose(&self) {
        Query::dispose(self)
    }

    fn invalidate(self: Rc<Self>) -> LocalBoxFuture<()> {
        Box::pin(async move { Query::invalidate(self).await })
    }

    fn wait_for_hydration(self: Rc<Self>) -> LocalBoxFuture<()> {
        Box::pin(async move { self.wait_for_hydration().await })
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

trait ErasedInfiniteQueryEntry {
    fn key(&self) -> &QueryKey;
    fn is_disposed(&self) -> bool;
    fn dispose(&self);
    fn invalidate(self: Rc<Self>) -> LocalBoxFuture<()>;
    fn wait_for_hydration(self: Rc<Self>) -> LocalBoxFuture<()>;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<S, TRaw, TPage, TParam> ErasedInfiniteQueryEntry for InfiniteQuery<S, TRaw, TPage, TParam>
where
    S: PersistedStore + 'static,
    TRaw: 'static,
    TPage: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
    TParam: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
{
    fn key(&self) -> &QueryKey {
        InfiniteQuery::key(self)
    }

    fn is_disposed(&self) -> bool {
        InfiniteQuery::is_disposed(self)
    }

    fn dispose(&self) {
        InfiniteQuery::dispose(self)
    }

    fn invalidate(self: Rc<Self>) -> LocalBoxFuture<()> {
        Box::pin(async move { InfiniteQuery::invalidate(self).await })
    }

    fn wait_for_hydration(self: Rc<Self>) -> LocalBoxFuture<()> {
        Box::pin(async move { self.wait_for_hydration().await })
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

trait ErasedMutationEntry {
    fn is_disposed(&self) -> bool;
    fn dispose(&self);
}

impl<TData, TVars> ErasedMutationEntry for Mutation<TData, TVars>
where
    TData: Clone + 'static,
{
    fn is_disposed(&self) -> bool {
        Mutation::is_disposed(self)
    }

    fn dispose(&self) {
        Mutation::dispose(self)
    }
}

type QueryRegistry = Rc<RefCell<HashMap<QueryKey, Rc<dyn ErasedQueryEntry>>>>;
type InfiniteQueryRegistry = Rc<RefCell<HashMap<QueryKey, Rc<dyn ErasedInfiniteQueryEntry>>>>;
type MutationRegistry = Rc<RefCell<HashMap<String, Rc<dyn ErasedMutationEntry>>>>;

thread_local! {
    /// Process-wide convenience slot (spec §9 "global singleton"). The
    /// teacher hands its client out via `leptos::provide_context`/
    /// `use_context`, a framework-specific equivalent of this; since this
    /// crate has no reactive-framework context system of its own, a
    /// thread-local `Rc<dyn Any>` slot plays the same role without forcing
    /// every consumer through one. `QueryClient` itself stays plainly
    /// constructable via `init`/`new_unchecked` so tests never have to touch
    /// this slot.
    static GLOBAL_CLIENT: RefCell<Option<Rc<dyn Any>>> = const { RefCell::new(None) };
}

/// The central registry (spec §4.6). Holds a `CacheLayer<S>` shared by every
/// entry it creates, and the client-wide `DefaultQueryOptions` fallback.
pub struct QueryClient<S> {
    cache: CacheLayer<S>,
    defaults: DefaultQueryOptions,
    queries: QueryRegistry,
    infinite_queries: InfiniteQueryRegistry,
    mutations: MutationRegistry,
}

impl<S: PersistedStore + 'static> QueryClient<S> {
    /// Explicit initialization (spec §9: "init({config, storage}) that must
    /// complete before any useQuery"). Calls the store's own `init()` before
    /// the client is usable.
    pub async fn init(defaults: DefaultQueryOptions, store: Rc<S>) -> Rc<Self> {
        store.init().await;
        Rc::new(QueryClient {
            cache: CacheLayer::new(store),
            defaults,
            queries: Rc::new(RefCell::new(HashMap::new())),
            infinite_queries: Rc::new(RefCell::new(HashMap::new())),
            mutations: Rc::new(RefCell::new(HashMap::new())),
        })
    }

    /// Constructs a client without awaiting `PersistedStore::init()` — for
    /// stores whose `init` is a no-op (e.g. `InMemoryStore`) or tests that
    /// do not need it.
    pub fn new_unchecked(defaults: DefaultQueryOptions, store: Rc<S>) -> Rc<Self> {
        Rc::new(QueryClient {
            cache: CacheLayer::new(store),
            defaults,
            queries: Rc::new(RefCell::new(HashMap::new())),
            infinite_queries: Rc::new(RefCell::new(HashMap::new())),
            mutations: Rc::new(RefCell::new(HashMap::new())),
        })
    }

    pub fn defaults(&self) -> &DefaultQueryOptions {
        &self.defaults
    }

    /// Installs `self` as the process-wide default client (spec §9 "global
    /// singleton"), retrievable later via [`QueryClient::global`]. Only one
    /// client per concrete `S` can be installed at a time; a later call
    /// replaces the earlier one.
    pub fn install_global(self: &Rc<Self>) {
        GLOBAL_CLIENT.with(|slot| *slot.borrow_mut() = Some(self.clone() as Rc<dyn Any>));
    }

    /// Retrieves the client installed by [`QueryClient::install_global`], if
    /// any was installed for this concrete `S`. Returns `None` rather than
    /// panicking when no client has been installed yet, or when the
    /// installed client's `S` does not match — callers that need the
    /// convenience singleton are expected to call `install_global` during
    /// startup before relying on `global()`.
    pub fn global() -> Option<Rc<Self>> {
        GLOBAL_CLIENT.with(|slot| slot.borrow().clone())?
            .downcast::<Self>()
            .ok()
    }

    /// Clears the process-wide default client, if one is installed. Mainly
    /// useful for tests that install a scoped client and want a clean slate
    /// afterward.
    pub fn clear_global() {
        GLOBAL_CLIENT.with(|slot| *slot.borrow_mut() = None);
    }

    /// Count of live entries across both registries (teacher's
    /// `QueryCache::size()`).
    pub fn size(&self) -> usize {
        self.queries.borrow().len() + self.infinite_queries.borrow().len()
    }

    /// `useQuery(key, fetch, opts)` (spec §4.6). Returns the existing entry
    /// (marked `isReused`) if one is already registered under `key`;
    /// otherwise instantiates and registers a new one.
    pub fn use_query<TRaw, TData>(
        self: &Rc<Self>,
        key: QueryKey,
        fetch_fn: FetchFn<TRaw>,
        options: QueryOptions<TRaw, TData>,
    ) -> Rc<Query<S, TRaw, TData>>
    where
        TRaw: serde::Serialize + serde::de::DeserializeOwned + 'static,
        TData: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
    {
        if let Some(existing) = self.queries.borrow().get(&key).cloned() {
            match existing.into_any().downcast::<Query<S, TRaw, TData>>() {
                Ok(query) => {
                    query.set_reused(true);
                    if query.refetch_on_mount() && query.is_stale() {
                        let query = query.clone();
                        util::spawn_local(async move {
                            Query::sync(query, false).await;
                        });
                    }
                    return query;
                }
                Err(_) => {
                    tracing::warn!(%key, "useQuery: existing entry has a different type, replacing it");
                }
            }
        }

        let query = Query::new(key.clone(), fetch_fn, options, self.cache.clone(), self.defaults);
        let queries = self.queries.clone();
        let dispose_key = key.clone();
        query.set_on_dispose(move || {
            queries.borrow_mut().remove(&dispose_key);
        });
        self.queries.borrow_mut().insert(key, query.clone());
        query
    }

    /// `useInfiniteQuery(...)` — mirror of [`QueryClient::use_query`].
    pub fn use_infinite_query<TRaw, TPage, TParam>(
        self: &Rc<Self>,
        key: QueryKey,
        fetch_page: FetchFn<TRaw>,
        transformer: Rc<dyn Fn(TRaw) -> Result<TPage, QueryError>>,
        page_params: PageParamFns<TPage, TParam>,
    ) -> Rc<InfiniteQuery<S, TRaw, TPage, TParam>>
    where
        TRaw: 'static,
        TPage: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
        TParam: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
    {
        if let Some(existing) = self.infinite_queries.borrow().get(&key).cloned() {
            match existing.into_any().downcast::<InfiniteQuery<S, TRaw, TPage, TParam>>() {
                Ok(query) => {
                    query.set_reused(true);
                    if query.signals().is_stale.get() {
                        let query = query.clone();
                        let cache_duration = self.defaults.cache_duration;
                        util::spawn_local(async move {
                            InfiniteQuery::sync(query, false, cache_duration).await;
                        });
                    }
                    return query;
                }
                Err(_) => {
                    tracing::warn!(%key, "useInfiniteQuery: existing entry has a different type, replacing it");
                }
            }
        }

        let query = InfiniteQuery::new(key.clone(), fetch_page, transformer, page_params, self.cache.clone());
        let queries = self.infinite_queries.clone();
        let dispose_key = key.clone();
        query.set_on_dispose(move || {
            queries.borrow_mut().remove(&dispose_key);
        });
        self.infinite_queries.borrow_mut().insert(key, query.clone());
        query
    }

    /// `useMutation(fn, opts)` — always a fresh, per-caller instance (spec
    /// §4.6), registered under its generated id purely so the client can
    /// enumerate/dispose live mutations; re-calling `useMutation` never
    /// returns a shared instance.
    pub fn use_mutation<TData, TVars>(
        self: &Rc<Self>,
        mutation_fn: MutationFn<TVars, TData>,
        callbacks: MutationCallbacks<TData, TVars>,
    ) -> Rc<Mutation<TData, TVars>>
    where
        TData: Clone + 'static,
        TVars: Clone + 'static,
    {
        let mutation = Mutation::new(mutation_fn, callbacks);
        let mutations = self.mutations.clone();
        let id = mutation.id.clone();
        mutation.set_on_dispose(move || {
            mutations.borrow_mut().remove(&id);
        });
        self.mutations.borrow_mut().insert(mutation.id.clone(), mutation.clone());
        mutation
    }

    fn matching_queries(&self, pattern: Option<&QueryKey>) -> Vec<Rc<dyn ErasedQueryEntry>> {
        self.queries
            .borrow()
            .values()
            .filter(|entry| match pattern {
                None => true,
                Some(p) => entry.key().matches_prefix(p),
            })
            .cloned()
            .collect()
    }

    fn matching_infinite_queries(&self, pattern: Option<&QueryKey>) -> Vec<Rc<dyn ErasedInfiniteQueryEntry>> {
        self.infinite_queries
            .borrow()
            .values()
            .filter(|entry| match pattern {
                None => true,
                Some(p) => entry.key().matches_prefix(p),
            })
            .cloned()
            .collect()
    }

    /// `invalidateQueries(pattern|null)` (spec §4.6): `None` invalidates
    /// every entry in both registries; `Some(pattern)` invalidates only
    /// entries whose key has `pattern` as a prefix.
    pub fn invalidate_queries(&self, pattern: Option<QueryKey>) {
        for entry in self.matching_queries(pattern.as_ref()) {
            util::spawn_local(async move {
                entry.invalidate().await;
            });
        }
        for entry in self.matching_infinite_queries(pattern.as_ref()) {
            util::spawn_local(async move {
                entry.invalidate().await;
            });
        }
    }

    /// `removeQueries(pattern|null)` (Open Question 1, resolved): drops
    /// matching entries from the registry *and* purges their persisted
    /// cache slots.
    pub async fn remove_queries(&self, pattern: Option<QueryKey>) {
        for entry in self.matching_queries(pattern.as_ref()) {
            let key = entry.key().clone();
            entry.dispose();
            self.cache.purge(&key).await;
        }
        for entry in self.matching_infinite_queries(pattern.as_ref()) {
            let key = entry.key().clone();
            entry.dispose();
            self.cache.purge(&key).await;
        }
    }

    /// `disposeQuery(key)`: disposes and purges exactly one entry.
    pub async fn dispose_query(&self, key: &QueryKey) {
        let query = self.queries.borrow().get(key).cloned();
        if let Some(query) = query {
            query.dispose();
        }
        let infinite = self.infinite_queries.borrow().get(key).cloned();
        if let Some(infinite) = infinite {
            infinite.dispose();
        }
        self.cache.purge(key).await;
    }

    /// `disposeAll()`. Snapshots the registries first so each entry's
    /// self-removal from `dispose()` does not mutate the collection being
    /// iterated (spec §4.6).
    pub fn dispose_all(&self) {
        let queries: Vec<_> = self.queries.borrow().values().cloned().collect();
        for entry in queries {
            entry.dispose();
        }
        let infinite: Vec<_> = self.infinite_queries.borrow().values().cloned().collect();
        for entry in infinite {
            entry.dispose();
        }
        let mutations: Vec<_> = self.mutations.borrow().values().cloned().collect();
        for entry in mutations {
            entry.dispose();
        }
    }

    /// Resolves once every currently-registered entry (`Query` or
    /// `InfiniteQuery`) has completed its initial cache-load attempt (spec
    /// §4.6 `waitForHydration`).
    pub async fn wait_for_hydration(&self) {
        let entries = self.matching_queries(None);
        for entry in entries {
            entry.wait_for_hydration().await;
        }
        let infinite = self.matching_infinite_queries(None);
        for entry in infinite {
            entry.wait_for_hydration().await;
        }
    }

    /// Scoped variant of [`QueryClient::wait_for_hydration`].
    pub async fn wait_for_queries_hydration(&self, keys: &[QueryKey]) {
        let registry = self.queries.borrow();
        let entries: Vec<_> = keys.iter().filter_map(|k| registry.get(k).cloned()).collect();
        drop(registry);
        for entry in entries {
            entry.wait_for_hydration().await;
        }

        let infinite_registry = self.infinite_queries.borrow();
        let infinite_entries: Vec<_> = keys.iter().filter_map(|k| infinite_registry.get(k).cloned()).collect();
        drop(infinite_registry);
        for entry in infinite_entries {
            entry.wait_for_hydration().await;
        }
    }

    /// `fetch_query`/`prefetch_query` split (teacher's `QueryClient`):
    /// `fetch_query` returns the fetched value; `prefetch_query` only warms
    /// the cache.
    pub async fn fetch_query<TRaw, TData>(
        self: &Rc<Self>,
        key: QueryKey,
        fetch_fn: FetchFn<TRaw>,
        options: QueryOptions<TRaw, TData>,
    ) -> Option<TData>
    where
        TRaw: serde::Serialize + serde::de::DeserializeOwned + 'static,
        TData: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
    {
        let query = self.use_query(key, fetch_fn, options);
        query.wait_for_hydration().await;
        query.signals().data.get()
    }

    pub async fn prefetch_query<TRaw, TData>(
        self: &Rc<Self>,
        key: QueryKey,
        fetch_fn: FetchFn<TRaw>,
        options: QueryOptions<TRaw, TData>,
    ) where
        TRaw: serde::Serialize + serde::de::DeserializeOwned + 'static,
        TData: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
    {
        let query = self.use_query(key, fetch_fn, options);
        query.wait_for_hydration().await;
    }

    /// Looks up a live, typed `Query` by key without materializing a new one
    /// (used by the granular list helpers below).
    fn get_query<TRaw, Item>(&self, key: &QueryKey) -> Option<Rc<Query<S, TRaw, Vec<Item>>>>
    where
        TRaw: serde::Serialize + serde::de::DeserializeOwned + 'static,
        Item: HasId + serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
    {
        let entry = self.queries.borrow().get(key).cloned()?;
        entry.into_any().downcast::<Query<S, TRaw, Vec<Item>>>().ok()
    }

    /// `updateQueryListItem(key, item, idFn)` (spec §4.6). Requires the
    /// target query to be in granular mode; otherwise a `configuration`
    /// error, per spec §7.
    pub async fn update_query_list_item<TRaw, Item>(
        &self,
        key: &QueryKey,
        id: &str,
        item: Item,
    ) -> Result<(), QueryError>
    where
        TRaw: serde::Serialize + serde::de::DeserializeOwned + 'static,
        Item: HasId + serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
    {
        let query = self
            .get_query::<TRaw, Item>(key)
            .ok_or_else(|| QueryError::configuration("no such query"))?;
        query.update_list_item(id, item).await
    }

    /// `addQueryListItem(key, item)`.
    pub async fn add_query_list_item<TRaw, Item>(&self, key: &QueryKey, item: Item) -> Result<(), QueryError>
    where
        TRaw: serde::Serialize + serde::de::DeserializeOwned + 'static,
        Item: HasId + serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
    {
        let query = self
            .get_query::<TRaw, Item>(key)
            .ok_or_else(|| QueryError::configuration("no such query"))?;
        query.add_list_item(item).await
    }

    /// `removeQueryListItem(key, id, idFn)`.
    pub async fn remove_query_list_item<TRaw, Item>(&self, key: &QueryKey, id: &str) -> Result<(), QueryError>
    where
        TRaw: serde::Serialize + serde::de::DeserializeOwned + 'static,
        Item: HasId + serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
    {
        let query = self
            .get_query::<TRaw, Item>(key)
            .ok_or_else(|| QueryError::configuration("no such query"))?;
        query.remove_list_item(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FetchContext;
    use crate::query_options::GranularCodec;

    #[tokio::test(flavor = "current_thread")]
    async fn global_client_install_and_retrieve_roundtrip() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                QueryClient::<InMemoryStore>::clear_global();
                assert!(QueryClient::<InMemoryStore>::global().is_none());

                let client = QueryClient::new_unchecked(DefaultQueryOptions::default(), Rc::new(InMemoryStore::new()));
                client.install_global();

                let retrieved = QueryClient::<InMemoryStore>::global().expect("installed client");
                assert!(Rc::ptr_eq(&client, &retrieved));

                QueryClient::<InMemoryStore>::clear_global();
                assert!(QueryClient::<InMemoryStore>::global().is_none());
            })
            .await;
    }
    use crate::store::InMemoryStore;
    use std::cell::Cell;

    fn fetch_value(value: i32) -> FetchFn<i32> {
        Rc::new(move |_ctx: FetchContext| Box::pin(async move { Ok(value) }))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reusing_a_key_returns_the_same_entry() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let client = QueryClient::new_unchecked(DefaultQueryOptions::default(), Rc::new(InMemoryStore::new()));
                let a = client.use_query(QueryKey::from(["n"]), fetch_value(1), QueryOptions::identity());
                let b = client.use_query(QueryKey::from(["n"]), fetch_value(2), QueryOptions::identity());
                assert!(Rc::ptr_eq(&a, &b));
                assert!(b.is_reused());
                assert_eq!(client.size(), 1);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dispose_query_removes_from_registry_and_purges_cache() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let client = QueryClient::new_unchecked(DefaultQueryOptions::default(), Rc::new(InMemoryStore::new()));
                let key = QueryKey::from(["n"]);
                let query = client.use_query(key.clone(), fetch_value(1), QueryOptions::identity());
                Query::refetch(query.clone()).await;
                assert_eq!(client.size(), 1);

                client.dispose_query(&key).await;
                assert_eq!(client.size(), 0);
                assert!(query.is_disposed());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn prefix_invalidation_only_touches_matching_keys() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let client = QueryClient::new_unchecked(DefaultQueryOptions::default(), Rc::new(InMemoryStore::new()));
                let posts = client.use_query(
                    QueryKey::from(["posts"]),
                    fetch_value(1),
                    QueryOptions::identity().with_enabled(false),
                );
                let users = client.use_query(
                    QueryKey::from(["users"]),
                    fetch_value(2),
                    QueryOptions::identity().with_enabled(false),
                );
                client.invalidate_queries(Some(QueryKey::from(["posts"])));
                // Let the spawned invalidation tasks run.
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                assert!(posts.signals().is_stale.get());
                assert!(!users.signals().is_stale.get());
            })
            .await;
    }

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
    struct Post {
        id: String,
        title: String,
    }

    impl HasId for Post {
        fn id(&self) -> String {
            self.id.clone()
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn granular_update_requires_granular_mode() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let client = QueryClient::new_unchecked(DefaultQueryOptions::default(), Rc::new(InMemoryStore::new()));
                let key = QueryKey::from(["posts"]);
                let fetch: FetchFn<Vec<Post>> = Rc::new(|_ctx| Box::pin(async move { Ok(vec![]) }));
                let _query = client.use_query(
                    key.clone(),
                    fetch,
                    QueryOptions::<Vec<Post>, Vec<Post>>::identity().with_enabled(false),
                );

                let result = client
                    .update_query_list_item::<Vec<Post>, Post>(&key, "1", Post { id: "1".into(), title: "a".into() })
                    .await;
                assert!(result.is_err());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn granular_update_touches_in_memory_list() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let client = QueryClient::new_unchecked(DefaultQueryOptions::default(), Rc::new(InMemoryStore::new()));
                let key = QueryKey::from(["posts"]);
                let fetch: FetchFn<Vec<Post>> = Rc::new(|_ctx| Box::pin(async move { Ok(vec![]) }));
                let query = client.use_query(
                    key.clone(),
                    fetch,
                    QueryOptions::<Vec<Post>, Vec<Post>>::identity()
                        .with_enabled(false)
                        .with_granular_codec(GranularCodec::for_vec()),
                );

                client
                    .add_query_list_item::<Vec<Post>, Post>(&key, Post { id: "1".into(), title: "a".into() })
                    .await
                    .unwrap();
                assert_eq!(query.signals().data.get().unwrap().len(), 1);

                client
                    .update_query_list_item::<Vec<Post>, Post>(&key, "1", Post { id: "1".into(), title: "b".into() })
                    .await
                    .unwrap();
                assert_eq!(query.signals().data.get().unwrap()[0].title, "b");

                client.remove_query_list_item::<Vec<Post>, Post>(&key, "1").await.unwrap();
                assert!(query.signals().data.get().unwrap().is_empty());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn granular_edits_survive_a_cold_reload() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let store = Rc::new(InMemoryStore::new());
                let key = QueryKey::from(["posts"]);

                let client = QueryClient::new_unchecked(DefaultQueryOptions::default(), store.clone());
                let fetch: FetchFn<Vec<Post>> = Rc::new(|_ctx| Box::pin(async move { Ok(vec![]) }));
                let _query = client.use_query(
                    key.clone(),
                    fetch,
                    QueryOptions::<Vec<Post>, Vec<Post>>::identity()
                        .with_enabled(false)
                        .with_granular_codec(GranularCodec::for_vec()),
                );
                client
                    .add_query_list_item::<Vec<Post>, Post>(&key, Post { id: "1".into(), title: "a".into() })
                    .await
                    .unwrap();

                // A fresh client over the same store stands in for a cold reload: the
                // granular record must be readable even though nothing wrote a blob.
                let reloaded = QueryClient::new_unchecked(DefaultQueryOptions::default(), store);
                let fetch: FetchFn<Vec<Post>> = Rc::new(|_ctx| Box::pin(async move { Ok(vec![]) }));
                let reloaded_query = reloaded.use_query(
                    key.clone(),
                    fetch,
                    QueryOptions::<Vec<Post>, Vec<Post>>::identity().with_granular_codec(GranularCodec::for_vec()),
                );
                reloaded_query.wait_for_hydration().await;
                assert_eq!(reloaded_query.signals().data.get().unwrap().len(), 1);
            })
            .await;
    }
}
