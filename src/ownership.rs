//! The UI-scope ownership/auto-disposal mixin (spec §4.6, §9): tracks which
//! entries a UI scope *created* versus merely *reused*, and disposes only
//! the former when the scope tears down. Grounded in the teacher's
//! `register_observer_handle_cleanup` (`use_query.rs`), which calls
//! `on_cleanup` to unregister an observer and only drops the underlying
//! `Query` once its last observer is gone; here that "am I the owner"
//! decision is made explicit rather than threaded through a reactive
//! runtime's cleanup hook, since this crate has no framework component
//! lifecycle of its own to hook into.
//!
//! The entry-level `is_reused` flag (spec §4.6) is a *global* property of the
//! registered entry, mutated by whichever `useQuery` call most recently
//! observed it already present. A scope must capture that flag's value at
//! the moment it acquired the entry, not re-read it later: if scope A
//! creates an entry and scope B subsequently reuses it, B's reuse flips the
//! shared flag to `true`, but that must not retroactively convince A it no
//! longer owns what it created.

use std::cell::RefCell;
use std::rc::Rc;

use crate::infinite_query::InfiniteQuery;
use crate::mutation::Mutation;
use crate::query::Query;
use crate::store::PersistedStore;

/// Type-erased disposal capability shared by every entry kind a scope can
/// own (`Query`, `InfiniteQuery`, `Mutation`).
pub trait Disposable {
    fn dispose_entry(&self);
}

impl<S, TRaw, TData> Disposable for Query<S, TRaw, TData>
where
    S: PersistedStore + 'static,
    TRaw: serde::Serialize + serde::de::DeserializeOwned + 'static,
    TData: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
{
    fn dispose_entry(&self) {
        self.dispose()
    }
}

impl<S, TRaw, TPage, TParam> Disposable for InfiniteQuery<S, TRaw, TPage, TParam>
where
    S: PersistedStore + 'static,
    TRaw: 'static,
    TPage: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
    TParam: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static,
{
    fn dispose_entry(&self) {
        self.dispose()
    }
}

impl<TData, TVars> Disposable for Mutation<TData, TVars>
where
    TData: Clone + 'static,
{
    fn dispose_entry(&self) {
        self.dispose()
    }
}

/// A UI scope's ownership ledger. Create one per component/view instance,
/// `track`/`adopt` the entries it touches, and call `dispose` on teardown.
///
/// `dispose` is safe to call more than once and safe to call on entries also
/// disposed elsewhere: every concrete `dispose()` is itself idempotent (spec
/// invariant 5), so double-registration within or across scopes never
/// double-frees anything observable.
#[derive(Default)]
pub struct OwnerScope {
    owned: RefCell<Vec<Rc<dyn Disposable>>>,
}

impl OwnerScope {
    pub fn new() -> Self {
        OwnerScope::default()
    }

    /// Registers an entry this scope obtained through `useQuery`/
    /// `useInfiniteQuery`/`useMutation`. `was_reused` must be the entry's
    /// `is_reused()` observed at the moment of that call — the scope owns
    /// the entry (and disposes it later) only if it was *not* already
    /// registered, i.e. this call created it.
    pub fn track(&self, entry: Rc<dyn Disposable>, was_reused: bool) {
        if !was_reused {
            self.owned.borrow_mut().push(entry);
        }
    }

    /// Registers an entry for disposal tracking regardless of whether this
    /// scope created it — e.g. an entry handed to this scope by an external
    /// store, purely so it is guaranteed to be cleaned up alongside
    /// everything else the scope owns (spec §9: "the same scope may
    /// register entries it did not create... purely for disposal tracking;
    /// the implementation must not double-dispose").
    pub fn adopt(&self, entry: Rc<dyn Disposable>) {
        self.owned.borrow_mut().push(entry);
    }

    /// Number of entries currently tracked for disposal.
    pub fn len(&self) -> usize {
        self.owned.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.borrow().is_empty()
    }

    /// Disposes every tracked entry and clears the ledger. Idempotent: a
    /// second call finds nothing left to dispose.
    pub fn dispose(&self) {
        for entry in self.owned.borrow_mut().drain(..) {
            entry.dispose_entry();
        }
    }
}
