//! The `Query<TData, TRaw>` state machine (spec §4.3) — about a third of this
//! crate's surface. Grounded in the teacher's `query.rs`/`query_state.rs`/
//! `query_executor.rs`: a shared in-flight handle for deduplication
//! (`async_cell`/`Rc<RefCell<…>>` in the teacher, here a waiter list plus a
//! `futures_channel::oneshot` per caller), a `futures::future::select` race
//! between the fetch and a timeout sleep, and disposal-safe signal writes.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use futures::future::{self, Either};
use futures_channel::oneshot;

use crate::cache::CacheLayer;
use crate::error::{QueryError, QueryErrorKind};
use crate::instant::{time_until_stale, Instant};
use crate::key::QueryKey;
use crate::query_options::{DefaultQueryOptions, QueryOptions};
use crate::signal::Signal;
use crate::status::QueryStatus;
use crate::store::PersistedStore;
use crate::util;

/// A boxed, `!Send` future — the model is single-threaded cooperative
/// concurrency (spec §5), so there is no reason to require `Send`.
pub type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T>>>;

/// Context handed to the user's fetch function (spec §6.3).
#[derive(Clone)]
pub struct FetchContext {
    pub query_key: QueryKey,
    cancelled: Rc<Cell<bool>>,
}

impl FetchContext {
    pub(crate) fn new(query_key: QueryKey, cancelled: Rc<Cell<bool>>) -> Self {
        FetchContext { query_key, cancelled }
    }

    /// Cooperative cancellation flag: the fetch function may poll this and
    /// abandon in-progress work. The entry itself guarantees the result is
    /// dropped regardless of whether the fetch function checks this.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

pub type FetchFn<TRaw> = Rc<dyn Fn(FetchContext) -> LocalBoxFuture<Result<TRaw, QueryError>>>;

/// Snapshot of the reactive signals a [`Query`] publishes.
pub struct QuerySignals<TData>
where
    TData: Clone + 'static,
{
    pub status: Signal<QueryStatus>,
    pub data: Signal<Option<TData>>,
    pub error: Signal<Option<QueryError>>,
    pub last_fetched_at: Signal<Option<Instant>>,
    pub is_stale: Signal<bool>,
}

impl<TData: Clone + 'static> Clone for QuerySignals<TData> {
    fn clone(&self) -> Self {
        QuerySignals {
            status: self.status.clone(),
            data: self.data.clone(),
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at.clone(),
            is_stale: self.is_stale.clone(),
        }
    }
}

struct InFlight<TData> {
    waiters: Vec<oneshot::Sender<Option<TData>>>,
    cancelled: Rc<Cell<bool>>,
}

/// Single-entry state machine for one `QueryKey` (spec §3/§4.3).
pub struct Query<S, TRaw, TData>
where
    TData: Clone + 'static,
{
    key: QueryKey,
    fetch_fn: FetchFn<TRaw>,
    options: RefCell<QueryOptions<TRaw, TData>>,
    cache: CacheLayer<S>,
    defaults: DefaultQueryOptions,
    signals: QuerySignals<TData>,

    is_hydrated: Cell<bool>,
    is_disposed: Cell<bool>,
    is_reused: Cell<bool>,

    in_flight: RefCell<Option<InFlight<TData>>>,
    hydration_waiters: RefCell<Vec<oneshot::Sender<()>>>,
    interval_generation: Cell<u64>,
    signal_watch_subscribed: Cell<bool>,
    on_dispose: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl<S, TRaw, TData> Query<S, TRaw, TData>
where
    S: PersistedStore + 'static,
    TRaw: serde::Serialize + serde::de::DeserializeOwned + 'static,
    TData: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
{
    pub fn new(
        key: QueryKey,
        fetch_fn: FetchFn<TRaw>,
        options: QueryOptions<TRaw, TData>,
        cache: CacheLayer<S>,
        defaults: DefaultQueryOptions,
    ) -> Rc<Self> {
        let enabled = options.enabled;
        let query = Rc::new(Query {
            key,
            fetch_fn,
            options: RefCell::new(options),
            cache,
            defaults,
            signals: QuerySignals {
                status: Signal::new(QueryStatus::Idle),
                data: Signal::new(None),
                error: Signal::new(None),
                last_fetched_at: Signal::new(None),
                is_stale: Signal::new(false),
            },
            is_hydrated: Cell::new(false),
            is_disposed: Cell::new(false),
            is_reused: Cell::new(false),
            in_flight: RefCell::new(None),
            hydration_waiters: RefCell::new(Vec::new()),
            interval_generation: Cell::new(0),
            signal_watch_subscribed: Cell::new(false),
            on_dispose: RefCell::new(None),
        });
        Query::initialize(query.clone(), enabled);
        query
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn signals(&self) -> &QuerySignals<TData> {
        &self.signals
    }

    /// Reads the current data snapshot. In sync `SignalWatchMode`, this is
    /// the point where watched signals are diffed and staleness recomputed
    /// (see `check_signal_watch_sync`); in reactive mode the check is a
    /// no-op since staleness is already pushed by the subscription.
    pub fn data(&self) -> Option<TData> {
        self.check_signal_watch_sync();
        self.signals.data.get()
    }

    pub fn is_hydrated(&self) -> bool {
        self.is_hydrated.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.is_disposed.get()
    }

    pub fn is_reused(&self) -> bool {
        self.is_reused.get()
    }

    pub fn set_reused(&self, reused: bool) {
        self.is_reused.set(reused);
    }

    /// Whether a reused entry should re-sync on mount (spec §4.6
    /// `useQuery` reuse path).
    pub fn refetch_on_mount(&self) -> bool {
        self.options.borrow().refetch_on_mount
    }

    pub fn is_loading(&self) -> bool {
        self.signals.status.get().is_loading()
    }

    pub fn is_success(&self) -> bool {
        self.signals.status.get().is_success()
    }

    pub fn is_error(&self) -> bool {
        self.signals.status.get().is_error()
    }

    /// Installs the callback the client uses to detach this entry from its
    /// registry on `dispose()` (spec §9 "cyclic references").
    pub fn set_on_dispose(&self, f: impl FnOnce() + 'static) {
        *self.on_dispose.borrow_mut() = Some(Box::new(f));
    }

    /// Effective staleness: either explicitly invalidated, or past
    /// `staleDuration` since the last successful fetch (invariant 3).
    /// `staleDuration`/`cacheDuration` fall back to the `QueryClient`'s
    /// configured defaults (`self.defaults`, threaded in at construction)
    /// whenever the per-entry option is unset, per spec §4.3.
    pub fn is_stale(&self) -> bool {
        self.check_signal_watch_sync();
        if self.signals.is_stale.get() {
            return true;
        }
        let options = self.options.borrow();
        match self.signals.last_fetched_at.get() {
            None => false,
            Some(last) => {
                time_until_stale(last, options.resolved_stale_duration(&self.defaults)).is_zero()
            }
        }
    }

    fn write_status(&self, status: QueryStatus) {
        if self.is_disposed.get() {
            return;
        }
        self.signals.status.set(status);
    }

    fn write_error(&self, error: Option<QueryError>) {
        if self.is_disposed.get() {
            return;
        }
        self.signals.error.set(error);
    }

    fn write_data(&self, data: Option<TData>) {
        if self.is_disposed.get() {
            return;
        }
        self.signals.data.set(data);
    }

    fn write_is_stale(&self, stale: bool) {
        if self.is_disposed.get() {
            return;
        }
        self.signals.is_stale.set(stale);
    }

    fn write_last_fetched_at(&self, at: Instant) {
        if self.is_disposed.get() {
            return;
        }
        self.signals.last_fetched_at.set(Some(at));
    }

    fn transform(&self, raw: TRaw) -> Result<TData, QueryError> {
        (self.options.borrow().transformer)(raw)
    }

    /// Cache-read side of the dual-path `setData` design (Open Question 2):
    /// a slot may hold either an already-transformed `TData` (written by
    /// `setData`) or a `TRaw` (written by a prior `refetch`). The direct
    /// `TData` decode is tried first; only on failure is the slot retried
    /// as `TRaw` and run back through the transformer.
    async fn load_from_cache(&self) -> Option<(TData, Instant)> {
        let granular = self.options.borrow().granular_codec.is_some();
        if granular {
            let (records, time) = self.cache.get_cached_granular_raw(&self.key).await?;
            let codec = self.options.borrow().granular_codec.clone()?;
            match (codec.from_records)(records) {
                Ok(data) => return Some((data, time)),
                Err(err) => {
                    tracing::debug!(key = %self.key, error = %err, "granular cache decode failed");
                    return None;
                }
            }
        }
        if let Some(hit) = self.cache.get_cached_blob::<TData>(&self.key).await {
            return Some(hit);
        }
        let (raw, time) = self.cache.get_cached_blob::<TRaw>(&self.key).await?;
        match self.transform(raw) {
            Ok(data) => Some((data, time)),
            Err(err) => {
                tracing::debug!(key = %self.key, error = %err, "raw cache decode/transform failed");
                None
            }
        }
    }

    async fn write_to_cache(&self, data: &TData, at: Instant) {
        let codec = self.options.borrow().granular_codec.clone();
        match codec {
            Some(codec) => {
                let records = (codec.to_records)(data);
                self.cache.set_cached_granular_raw(&self.key, records, at).await;
            }
            None => {
                self.cache.set_cached_blob(&self.key, data, at).await;
            }
        }
    }

    /// Initialization protocol (spec §4.3): disabled entries go straight to
    /// idle; enabled entries try the cache first, then decide between noop,
    /// background refresh, or foreground refetch based on freshness.
    fn initialize(this: Rc<Self>, enabled: bool) {
        if !enabled {
            this.complete_hydration();
            return;
        }
        util::spawn_local(async move {
            match this.load_from_cache().await {
                Some((data, time)) => {
                    this.write_data(Some(data));
                    this.write_status(QueryStatus::Success);
                    this.write_last_fetched_at(time);
                    this.complete_hydration();

                    let cache_duration = this.options.borrow().resolved_cache_duration(&this.defaults);
                    let stale_duration = this.options.borrow().resolved_stale_duration(&this.defaults);
                    let expired = time.elapsed() > cache_duration;
                    let stale = time.elapsed() > stale_duration;
                    if expired {
                        Query::refetch(this.clone()).await;
                    } else if stale {
                        Query::background_fetch(this.clone()).await;
                    }
                }
                None => {
                    this.complete_hydration();
                    Query::refetch(this.clone()).await;
                }
            }
            Query::arm_interval(this.clone());
            Query::arm_signal_watch(this);
        });
    }

    fn complete_hydration(&self) {
        self.is_hydrated.set(true);
        for waiter in self.hydration_waiters.borrow_mut().drain(..) {
            let _ = waiter.send(());
        }
    }

    /// Resolves once this entry's initial cache-load attempt has finished
    /// (success or failure), per spec §4.6 `waitForHydration`.
    pub async fn wait_for_hydration(&self) {
        if self.is_hydrated.get() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        self.hydration_waiters.borrow_mut().push(tx);
        let _ = rx.await;
    }

    /// `sync({force})` rule table (spec §4.3).
    pub async fn sync(this: Rc<Self>, force: bool) {
        this.wait_for_hydration().await;
        if this.is_disposed.get() {
            return;
        }
        let has_data = this.signals.data.with(|d| d.is_some());
        if force || !has_data {
            Query::refetch(this).await;
            return;
        }
        let expired = match this.signals.last_fetched_at.get() {
            Some(last) => last.elapsed() > this.options.borrow().resolved_cache_duration(&this.defaults),
            None => true,
        };
        if expired {
            Query::refetch(this).await;
            return;
        }
        if this.is_stale() {
            Query::background_fetch(this).await;
        }
    }

    /// Foreground `refetch()` (spec §4.3): loading state, timeout race,
    /// dedup, cache write, and terminal status on completion.
    pub async fn refetch(this: Rc<Self>) -> Option<TData> {
        Query::run_fetch(this, true).await
    }

    /// Background "silent" revalidation for the stale-while-revalidate path:
    /// does not toggle `status` to `loading` and never clears `data`.
    async fn background_fetch(this: Rc<Self>) -> Option<TData> {
        if this.in_flight.borrow().is_some() {
            return None;
        }
        Query::run_fetch(this, false).await
    }

    async fn run_fetch(this: Rc<Self>, foreground: bool) -> Option<TData> {
        if this.is_disposed.get() {
            return None;
        }

        if let Some(waiter) = Query::join_in_flight(&this) {
            return waiter.await.ok().flatten();
        }

        let cancelled = Rc::new(Cell::new(false));
        *this.in_flight.borrow_mut() = Some(InFlight {
            waiters: Vec::new(),
            cancelled: cancelled.clone(),
        });

        if foreground {
            this.write_status(QueryStatus::Loading);
            this.write_error(None);
        }

        let ctx = FetchContext::new(this.key.clone(), cancelled.clone());
        let fetch_future = (this.fetch_fn)(ctx);
        let timeout = this.options.borrow().request_timeout;

        let outcome = match timeout {
            Some(duration) => match future::select(fetch_future, Box::pin(util::sleep(duration))).await {
                Either::Left((result, _)) => Some(result),
                Either::Right((_, _)) => None,
            },
            None => Some(fetch_future.await),
        };

        if cancelled.get() || this.is_disposed.get() {
            Query::resolve_in_flight(&this, None);
            return None;
        }

        let result = match outcome {
            None => {
                let err = QueryError::timeout();
                if foreground {
                    this.write_error(Some(err.clone()));
                    this.write_status(QueryStatus::from_error_kind(QueryErrorKind::Timeout));
                } else {
                    this.write_is_stale(true);
                }
                Err(err)
            }
            Some(Err(err)) => {
                if foreground {
                    this.write_error(Some(err.clone()));
                    this.write_status(QueryStatus::from_error_kind(err.kind));
                } else {
                    this.write_is_stale(true);
                }
                Err(err)
            }
            Some(Ok(raw)) => match this.transform(raw) {
                Ok(data) => {
                    let now = Instant::now();
                    this.write_to_cache(&data, now).await;
                    this.write_data(Some(data.clone()));
                    this.write_status(QueryStatus::Success);
                    this.write_last_fetched_at(now);
                    this.write_is_stale(false);
                    Ok(data)
                }
                Err(err) => {
                    if foreground {
                        this.write_error(Some(err.clone()));
                        this.write_status(QueryStatus::from_error_kind(err.kind));
                    } else {
                        this.write_is_stale(true);
                    }
                    Err(err)
                }
            },
        };

        let data = result.ok();
        Query::resolve_in_flight(&this, data.clone());
        Query::arm_interval(this);
        data
    }

    fn join_in_flight(this: &Rc<Self>) -> Option<oneshot::Receiver<Option<TData>>> {
        let mut in_flight = this.in_flight.borrow_mut();
        let slot = in_flight.as_mut()?;
        let (tx, rx) = oneshot::channel();
        slot.waiters.push(tx);
        Some(rx)
    }

    fn resolve_in_flight(this: &Rc<Self>, data: Option<TData>) {
        if let Some(slot) = this.in_flight.borrow_mut().take() {
            for waiter in slot.waiters {
                let _ = waiter.send(data.clone());
            }
        }
    }

    /// Marks this entry stale; if enabled, also triggers a `refetch()`.
    pub async fn invalidate(this: Rc<Self>) {
        this.write_is_stale(true);
        if this.options.borrow().enabled {
            Query::refetch(this).await;
        }
    }

    pub fn mark_stale(&self) {
        self.write_is_stale(true);
    }

    /// Optimistic write (spec §4.3, Open Question 2 resolved as dual-path:
    /// stores the already-transformed value; hydration tries `TData` first
    /// and falls back to `TRaw` + transform).
    pub async fn set_data(&self, value: TData) {
        let now = Instant::now();
        self.write_to_cache(&value, now).await;
        self.write_data(Some(value));
        self.write_status(QueryStatus::Success);
        self.write_last_fetched_at(now);
        self.write_is_stale(false);
    }

    /// Cooperative cancellation: flips the in-flight cancel flag so the
    /// racing fetch/timeout future discards whichever side resolves, and
    /// drops the pending result for any joined waiter.
    pub fn cancel(&self) {
        if let Some(slot) = self.in_flight.borrow().as_ref() {
            slot.cancelled.set(true);
        }
    }

    /// Tears this entry down: cancels any in-flight fetch, stops the
    /// interval timer and signal-watch subscription, disposes its signals,
    /// and asks the client to forget it.
    pub fn dispose(&self) {
        if self.is_disposed.get() {
            return;
        }
        self.cancel();
        self.is_disposed.set(true);
        self.interval_generation.set(self.interval_generation.get().wrapping_add(1));
        self.signals.status.dispose();
        self.signals.data.dispose();
        self.signals.error.dispose();
        self.signals.last_fetched_at.dispose();
        self.signals.is_stale.dispose();
        if let Some(cb) = self.on_dispose.borrow_mut().take() {
            cb();
        }
    }

    /// Arms the interval-refetch timer (spec §4.3): `refetchIntervalFn` is
    /// re-evaluated after every completed fetch; otherwise the fixed
    /// `refetchInterval` applies. The timer drives background fetches only
    /// and is torn down on disposal (via the generation counter).
    fn arm_interval(this: Rc<Self>) {
        let generation = this.interval_generation.get().wrapping_add(1);
        this.interval_generation.set(generation);

        let (data, error, next) = {
            let data = this.signals.data.get();
            let error = this.signals.error.get();
            let next = this.options.borrow().next_refetch_interval(data.as_ref(), error.as_ref());
            (data, error, next)
        };
        let _ = (data, error);
        let Some(duration) = next else { return };
        if this.is_disposed.get() {
            return;
        }

        util::spawn_local(async move {
            util::sleep(duration).await;
            if this.is_disposed.get() || this.interval_generation.get() != generation {
                return;
            }
            Query::background_fetch(this.clone()).await;
        });
    }

    /// Arms `watchSignals` in reactive mode: a single subscription per
    /// watched cell that triggers `markStale()` + dedup'd `refetch()` on any
    /// change. In sync mode, watched signals are only diffed lazily on the
    /// next `data`/`is_stale` read (see `check_signal_watch_sync`).
    fn arm_signal_watch(this: Rc<Self>) {
        if this.signal_watch_subscribed.get() {
            return;
        }
        let options = this.options.borrow();
        if options.signal_watch_mode != crate::query_options::SignalWatchMode::Reactive {
            return;
        }
        for watched in &options.watch_signals {
            let this = this.clone();
            watched.subscribe_change(Rc::new(move || {
                let this = this.clone();
                this.mark_stale();
                util::spawn_local(async move {
                    Query::refetch(this).await;
                });
            }));
        }
        drop(options);
        this.signal_watch_subscribed.set(true);
    }

    /// Sync-mode signal watch: called before reading `data`/`is_stale`;
    /// diffs watched signals against their last-seen snapshot and marks
    /// stale on any divergence (the actual refetch happens on next access).
    pub fn check_signal_watch_sync(&self) {
        let options = self.options.borrow();
        if options.signal_watch_mode != crate::query_options::SignalWatchMode::Sync {
            return;
        }
        let changed = options.watch_signals.iter().any(|s| s.has_changed());
        drop(options);
        if changed {
            self.mark_stale();
        }
    }
}

/// Granular-mode list mutations (spec §4.6 `updateQueryListItem`/
/// `addQueryListItem`/`removeQueryListItem`, invariant 6). Only available
/// when `TData` is actually a `Vec<Item>` — Rust's static typing can't
/// express the source's duck-typed `HasId` constraint as a bound on an
/// arbitrary `TData`, so these three operations live in a dedicated impl
/// block keyed on that concrete shape rather than on `Query` generally.
impl<S, TRaw, Item> Query<S, TRaw, Vec<Item>>
where
    S: PersistedStore + 'static,
    TRaw: serde::Serialize + serde::de::DeserializeOwned + 'static,
    Item: crate::cache::HasId + serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
{
    /// Granular mode is on iff a `granular_codec` is configured — the same
    /// flag `load_from_cache`/`write_to_cache` gate on, so a query can never
    /// accept per-item mutations through one path while hydrating/persisting
    /// in blob mode through the other.
    pub fn granular_updates_enabled(&self) -> bool {
        self.options.borrow().granular_codec.is_some()
    }

    /// Replaces the element with a matching id, or appends it if absent.
    /// Writes exactly one persistent record.
    pub async fn update_list_item(&self, id: &str, item: Item) -> Result<(), QueryError> {
        if !self.granular_updates_enabled() {
            return Err(QueryError::configuration("target query is not in granular mode"));
        }
        let mut list = self.signals.data.get().unwrap_or_default();
        match list.iter().position(|existing| existing.id() == id) {
            Some(pos) => list[pos] = item.clone(),
            None => list.push(item.clone()),
        }
        self.write_data(Some(list));
        self.cache.set_one_record(&self.key, &item).await;
        Ok(())
    }

    /// Appends `item`. Writes exactly one persistent record.
    pub async fn add_list_item(&self, item: Item) -> Result<(), QueryError> {
        if !self.granular_updates_enabled() {
            return Err(QueryError::configuration("target query is not in granular mode"));
        }
        let mut list = self.signals.data.get().unwrap_or_default();
        list.push(item.clone());
        self.write_data(Some(list));
        self.cache.set_one_record(&self.key, &item).await;
        Ok(())
    }

    /// Filters out the element with matching id. Deletes exactly one
    /// persistent record.
    pub async fn remove_list_item(&self, id: &str) -> Result<(), QueryError> {
        if !self.granular_updates_enabled() {
            return Err(QueryError::configuration("target query is not in granular mode"));
        }
        let mut list = self.signals.data.get().unwrap_or_default();
        list.retain(|existing| existing.id() != id);
        self.write_data(Some(list));
        self.cache.delete_one_record(&self.key, id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::cell::RefCell as StdRefCell;

    fn cache() -> CacheLayer<InMemoryStore> {
        CacheLayer::new(Rc::new(InMemoryStore::new()))
    }

    fn fetch_once(value: i32) -> (FetchFn<i32>, Rc<Cell<u32>>) {
        let calls = Rc::new(Cell::new(0));
        let calls_for_fn = calls.clone();
        let fetch: FetchFn<i32> = Rc::new(move |_ctx| {
            calls_for_fn.set(calls_for_fn.get() + 1);
            Box::pin(async move { Ok(value) })
        });
        (fetch, calls)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn refetch_populates_success_state() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (fetch, _calls) = fetch_once(7);
                let query = Query::new(
                    QueryKey::from(["n"]),
                    fetch,
                    QueryOptions::identity().with_enabled(false),
                    cache(),
                    DefaultQueryOptions::default(),
                );
                let result = Query::refetch(query.clone()).await;
                assert_eq!(result, Some(7));
                assert_eq!(query.signals().data.get(), Some(7));
                assert!(query.is_success());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_refetch_dedupes_to_one_call() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let calls_for_fn = calls.clone();
                let fetch: FetchFn<i32> = Rc::new(move |_ctx| {
                    calls_for_fn.set(calls_for_fn.get() + 1);
                    Box::pin(async move {
                        util::sleep(Duration::from_millis(10)).await;
                        Ok(1)
                    })
                });
                let query = Query::new(
                    QueryKey::from(["n"]),
                    fetch,
                    QueryOptions::identity().with_enabled(false),
                    cache(),
                    DefaultQueryOptions::default(),
                );
                let (a, b, c) = futures::join!(
                    Query::refetch(query.clone()),
                    Query::refetch(query.clone()),
                    Query::refetch(query.clone())
                );
                assert_eq!(a, Some(1));
                assert_eq!(b, Some(1));
                assert_eq!(c, Some(1));
                assert_eq!(calls.get(), 1);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn timeout_marks_timeout_status_and_ignores_late_result() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let fetch: FetchFn<i32> = Rc::new(move |_ctx| {
                    Box::pin(async move {
                        util::sleep(Duration::from_millis(50)).await;
                        Ok(1)
                    })
                });
                let query = Query::new(
                    QueryKey::from(["n"]),
                    fetch,
                    QueryOptions::identity()
                        .with_enabled(false)
                        .with_request_timeout(Duration::from_millis(5)),
                    cache(),
                    DefaultQueryOptions::default(),
                );
                let result = Query::refetch(query.clone()).await;
                assert_eq!(result, None);
                assert_eq!(query.signals().status.get(), QueryStatus::Timeout);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dispose_prevents_further_signal_writes() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (fetch, _calls) = fetch_once(1);
                let query = Query::new(
                    QueryKey::from(["n"]),
                    fetch,
                    QueryOptions::identity().with_enabled(false),
                    cache(),
                    DefaultQueryOptions::default(),
                );
                Query::refetch(query.clone()).await;
                query.dispose();
                query.set_data(99).await;
                assert_eq!(query.signals().data.get(), Some(1));
                assert!(query.is_disposed());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn disabled_query_never_fetches_until_refetch() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let calls = Rc::new(StdRefCell::new(0));
                let calls_for_fn = calls.clone();
                let fetch: FetchFn<i32> = Rc::new(move |_ctx| {
                    *calls_for_fn.borrow_mut() += 1;
                    Box::pin(async move { Ok(1) })
                });
                let query = Query::new(
                    QueryKey::from(["n"]),
                    fetch,
                    QueryOptions::identity().with_enabled(false),
                    cache(),
                    DefaultQueryOptions::default(),
                );
                assert_eq!(*calls.borrow(), 0);
                assert_eq!(query.signals().status.get(), QueryStatus::Idle);
                Query::refetch(query.clone()).await;
                assert_eq!(*calls.borrow(), 1);
            })
            .await;
    }
}
