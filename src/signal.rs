//! Minimal reactive cell standing in for the external `Signal<T>`
//! collaborator named in spec §6.2. Out-of-scope per the spec (the real
//! implementation lives in whatever UI reactive library a consumer brings),
//! but the cache needs *something* concrete to publish state through, so
//! this module supplies a dependency-light cell with the same
//! read/write/dispose/derive-once contract, using the same listener-registry
//! shape the teacher's `QueryObserver` uses (`slotmap::SlotMap` of
//! subscriber callbacks) instead of hooking into a specific framework
//! runtime.

use std::cell::RefCell;
use std::rc::Rc;

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    struct SubscriberKey;
}

struct Inner<T> {
    value: T,
    subscribers: SlotMap<SubscriberKey, Box<dyn Fn(&T)>>,
    disposed: bool,
}

/// A disposable reactive cell.
///
/// Writes route through [`Signal::set`]/[`Signal::update`], which are no-ops
/// once [`Signal::dispose`] has been called — this is the "disposal-safe
/// signal" wrapper from the spec's design notes (§9): late writes from a
/// cancelled or disposed entry are silently dropped rather than observed.
#[derive(Clone)]
pub struct Signal<T: Clone + 'static> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: Clone + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Signal {
            inner: Rc::new(RefCell::new(Inner {
                value,
                subscribers: SlotMap::with_key(),
                disposed: false,
            })),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Run `f` against a reference to the current value, avoiding a clone.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Overwrite the value and notify subscribers. No-op if disposed.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return;
            }
            inner.value = value.clone();
        }
        // Re-borrow immutably to invoke callbacks, so a subscriber that
        // reads the signal mid-notification doesn't hit a borrow conflict.
        let inner = self.inner.borrow();
        for cb in inner.subscribers.values() {
            cb(&value);
        }
    }

    /// Update the value in place via `f`. No-op if disposed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return;
        }
        f(&mut inner.value);
        let value = inner.value.clone();
        drop(inner);
        let inner = self.inner.borrow();
        for cb in inner.subscribers.values() {
            cb(&value);
        }
    }

    /// Subscribe to every subsequent value. Returns a key usable with
    /// [`Signal::unsubscribe`]. No-op registration after disposal.
    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> SubscriptionKey {
        let mut inner = self.inner.borrow_mut();
        let key = inner.subscribers.insert(Box::new(f));
        SubscriptionKey(key)
    }

    pub fn unsubscribe(&self, key: SubscriptionKey) {
        self.inner.borrow_mut().subscribers.remove(key.0);
    }

    /// True once [`Signal::dispose`] has run; writes after this point are
    /// no-ops.
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    /// Tear down: drop all subscribers and mark future writes as no-ops.
    pub fn dispose(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.disposed = true;
        inner.subscribers.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionKey(SubscriberKey);

/// A read-only view derived from one or more [`Signal`]s, recomputed on
/// every write to the tracked source (the "derive-once" operation from
/// spec §6.2).
pub struct Computed<T: Clone + 'static> {
    cache: Rc<RefCell<T>>,
}

impl<T: Clone + 'static> Computed<T> {
    pub fn new<S: Clone + 'static>(source: &Signal<S>, derive: impl Fn(&S) -> T + 'static) -> Self {
        let initial = source.with(|s| derive(s));
        let cache = Rc::new(RefCell::new(initial));
        let cache_for_sub = cache.clone();
        source.subscribe(move |value: &S| {
            *cache_for_sub.borrow_mut() = derive(value);
        });
        Computed { cache }
    }

    pub fn get(&self) -> T {
        self.cache.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn get_set_roundtrip() {
        let sig = Signal::new(1);
        assert_eq!(sig.get(), 1);
        sig.set(2);
        assert_eq!(sig.get(), 2);
    }

    #[test]
    fn subscribers_are_notified() {
        let sig = Signal::new(0);
        let seen = Rc::new(Cell::new(0));
        let seen2 = seen.clone();
        sig.subscribe(move |v| seen2.set(*v));
        sig.set(42);
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn disposed_signal_ignores_writes() {
        let sig = Signal::new(1);
        sig.dispose();
        sig.set(99);
        assert_eq!(sig.get(), 1);
        assert!(sig.is_disposed());
    }

    #[test]
    fn computed_tracks_source() {
        let sig = Signal::new(2);
        let doubled = Computed::new(&sig, |v: &i32| v * 2);
        assert_eq!(doubled.get(), 4);
        sig.set(5);
        assert_eq!(doubled.get(), 10);
    }
}
