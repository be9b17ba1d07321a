#![forbid(unsafe_code)]

//! # reactive_query
//!
//! A reactive, asynchronous data cache in the shape of
//! [Tanstack/React Query](https://tanstack.com/query/latest): fetch, cache,
//! deduplicate, invalidate, and persist the results of async operations, and
//! expose each cache entry as a set of observable values UI code subscribes
//! to.
//!
//! A [`Query`] provides:
//! - caching, keyed by a structural [`QueryKey`]
//! - de-duplication of concurrent in-flight fetches
//! - stale-while-revalidate background refetching
//! - refetch intervals and signal-driven refetch
//! - cancellation and disposal-safe signal writes
//! - hydration from a pluggable [`PersistedStore`]
//!
//! [`InfiniteQuery`] is the paginated sibling (bidirectional page params);
//! [`Mutation`] is the one-shot write counterpart; [`QueryClient`] is the
//! registry that creates, reuses, invalidates, and tears these down.
//!
//! # Example
//!
//! ```no_run
//! use reactive_query::*;
//! use std::rc::Rc;
//!
//! #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
//! struct Track { name: String }
//!
//! # async fn doc() {
//! let store = Rc::new(InMemoryStore::new());
//! let client = QueryClient::init(DefaultQueryOptions::default(), store).await;
//!
//! let fetch_track: FetchFn<Track> = Rc::new(|_ctx| {
//!     Box::pin(async move { Ok(Track { name: "Track".into() }) })
//! });
//!
//! let query = client.use_query(
//!     QueryKey::from(["track", 1]),
//!     fetch_track,
//!     QueryOptions::identity(),
//! );
//! query.wait_for_hydration().await;
//! let data = query.signals().data.get();
//! # }
//! ```

mod cache;
mod error;
mod infinite_query;
mod instant;
mod key;
mod mutation;
mod ownership;
mod query;
mod query_client;
mod query_options;
mod signal;
mod status;
mod store;
mod util;

pub use cache::{CacheLayer, HasId};
pub use error::{QueryError, QueryErrorKind};
pub use infinite_query::{
    add_to_infinite_query_first_page, remove_from_infinite_query, update_infinite_query_item,
    InfiniteData, InfiniteQuery, InfiniteQuerySignals, PageParamFns,
};
pub use instant::{time_until_stale, Instant};
pub use key::{QueryKey, Scalar};
pub use mutation::{Mutation, MutationCallbacks, MutationFn, MutationSignals};
pub use ownership::{Disposable, OwnerScope};
pub use query::{FetchContext, FetchFn, LocalBoxFuture, Query, QuerySignals};
pub use query_client::QueryClient;
pub use query_options::{
    watch, DefaultQueryOptions, GranularCodec, QueryOptions, SignalWatchMode, WatchedSignal,
};
pub use signal::{Computed, Signal, SubscriptionKey};
pub use status::QueryStatus;
pub use store::{InMemoryStore, PersistedStore};
pub use util::generate_id;
