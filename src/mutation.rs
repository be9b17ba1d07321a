//! The `Mutation<TData, TVars>` state machine (spec §4.5): a one-shot write,
//! stateless between calls until `mutate(input)` runs. Grounded in
//! `marc2332-dioxus-query`'s `mutation.rs` — its `MutationStateData` enum
//! (`Pending`/`Loading`/`Settled`) and `UseMutation::mutate`/`mutate_async`
//! split map directly onto the reactive signals and async entry point used
//! here.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::error::QueryError;
use crate::signal::Signal;
use crate::status::QueryStatus;
use crate::util;

pub type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T>>>;

pub type MutationFn<TVars, TData> = Rc<dyn Fn(TVars) -> LocalBoxFuture<Result<TData, QueryError>>>;

/// Lifecycle callbacks (spec §4.5: `onSuccess`, `onError`, `onSettled`).
pub struct MutationCallbacks<TData, TVars> {
    pub on_success: Option<Rc<dyn Fn(&TData, &TVars)>>,
    pub on_error: Option<Rc<dyn Fn(&QueryError, &TVars)>>,
    pub on_settled: Option<Rc<dyn Fn()>>,
}

impl<TData, TVars> Default for MutationCallbacks<TData, TVars> {
    fn default() -> Self {
        MutationCallbacks {
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }
}

impl<TData, TVars> Clone for MutationCallbacks<TData, TVars> {
    fn clone(&self) -> Self {
        MutationCallbacks {
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
        }
    }
}

pub struct MutationSignals<TData>
where
    TData: Clone + 'static,
{
    pub status: Signal<QueryStatus>,
    pub data: Signal<Option<TData>>,
    pub error: Signal<Option<QueryError>>,
}

impl<TData: Clone + 'static> Clone for MutationSignals<TData> {
    fn clone(&self) -> Self {
        MutationSignals {
            status: self.status.clone(),
            data: self.data.clone(),
            error: self.error.clone(),
        }
    }
}

/// A fresh, per-caller instance (spec §4.6: "`useMutation` always returns a
/// fresh instance with a unique id; mutations are per-caller").
pub struct Mutation<TData, TVars>
where
    TData: Clone + 'static,
{
    pub id: String,
    mutation_fn: MutationFn<TVars, TData>,
    callbacks: MutationCallbacks<TData, TVars>,
    signals: MutationSignals<TData>,
    is_disposed: std::cell::Cell<bool>,
    generation: std::cell::Cell<u64>,
    on_dispose: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl<TData, TVars> Mutation<TData, TVars>
where
    TData: Clone + 'static,
    TVars: Clone + 'static,
{
    pub fn new(mutation_fn: MutationFn<TVars, TData>, callbacks: MutationCallbacks<TData, TVars>) -> Rc<Self> {
        Rc::new(Mutation {
            id: util::generate_id(),
            mutation_fn,
            callbacks,
            signals: MutationSignals {
                status: Signal::new(QueryStatus::Idle),
                data: Signal::new(None),
                error: Signal::new(None),
            },
            is_disposed: std::cell::Cell::new(false),
            generation: std::cell::Cell::new(0),
            on_dispose: RefCell::new(None),
        })
    }

    pub fn signals(&self) -> &MutationSignals<TData> {
        &self.signals
    }

    pub fn is_disposed(&self) -> bool {
        self.is_disposed.get()
    }

    pub fn set_on_dispose(&self, f: impl FnOnce() + 'static) {
        *self.on_dispose.borrow_mut() = Some(Box::new(f));
    }

    fn write_status(&self, status: QueryStatus) {
        if !self.is_disposed.get() {
            self.signals.status.set(status);
        }
    }

    fn write_error(&self, error: Option<QueryError>) {
        if !self.is_disposed.get() {
            self.signals.error.set(error);
        }
    }

    fn write_data(&self, data: Option<TData>) {
        if !self.is_disposed.get() {
            self.signals.data.set(data);
        }
    }

    /// Runs the mutation to completion (spec §4.5 steps 1-3). A result
    /// arriving after `dispose()` is dropped rather than written to signals.
    pub async fn mutate(this: Rc<Self>, input: TVars) -> Option<TData> {
        let generation = this.generation.get();
        this.write_status(QueryStatus::Loading);
        this.write_error(None);

        let result = (this.mutation_fn)(input.clone()).await;

        if this.is_disposed.get() || this.generation.get() != generation {
            return None;
        }

        match result {
            Ok(data) => {
                this.write_data(Some(data.clone()));
                this.write_status(QueryStatus::Success);
                if let Some(on_success) = &this.callbacks.on_success {
                    on_success(&data, &input);
                }
                if let Some(on_settled) = &this.callbacks.on_settled {
                    on_settled();
                }
                Some(data)
            }
            Err(err) => {
                this.write_error(Some(err.clone()));
                this.write_status(QueryStatus::from_error_kind(err.kind));
                if let Some(on_error) = &this.callbacks.on_error {
                    on_error(&err, &input);
                }
                if let Some(on_settled) = &this.callbacks.on_settled {
                    on_settled();
                }
                None
            }
        }
    }

    /// Returns the machine to `idle`, clearing `data`/`error`. Does not
    /// cancel an in-flight `mutate` call; its result is simply discarded
    /// (the generation counter bumps here too, same as `dispose`).
    pub fn reset(&self) {
        self.generation.set(self.generation.get().wrapping_add(1));
        self.write_status(QueryStatus::Idle);
        self.write_error(None);
        self.write_data(None);
    }

    pub fn dispose(&self) {
        if self.is_disposed.get() {
            return;
        }
        self.is_disposed.set(true);
        self.generation.set(self.generation.get().wrapping_add(1));
        self.signals.status.dispose();
        self.signals.data.dispose();
        self.signals.error.dispose();
        if let Some(cb) = self.on_dispose.borrow_mut().take() {
            cb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mutate_success_updates_signals_and_calls_hooks() {
        let success_calls = Rc::new(std::cell::Cell::new(0));
        let settled_calls = Rc::new(std::cell::Cell::new(0));
        let success_calls_cb = success_calls.clone();
        let settled_calls_cb = settled_calls.clone();

        let mutation_fn: MutationFn<i32, i32> = Rc::new(|v| Box::pin(async move { Ok(v * 2) }));
        let callbacks = MutationCallbacks {
            on_success: Some(Rc::new(move |_data: &i32, _vars: &i32| {
                success_calls_cb.set(success_calls_cb.get() + 1);
            })),
            on_error: None,
            on_settled: Some(Rc::new(move || settled_calls_cb.set(settled_calls_cb.get() + 1))),
        };
        let mutation = Mutation::new(mutation_fn, callbacks);

        let result = Mutation::mutate(mutation.clone(), 21).await;
        assert_eq!(result, Some(42));
        assert_eq!(mutation.signals().data.get(), Some(42));
        assert!(mutation.signals().status.get().is_success());
        assert_eq!(success_calls.get(), 1);
        assert_eq!(settled_calls.get(), 1);
    }

    #[tokio::test]
    async fn mutate_failure_sets_error_status_and_calls_on_error() {
        let error_calls = Rc::new(std::cell::Cell::new(0));
        let error_calls_cb = error_calls.clone();
        let mutation_fn: MutationFn<i32, i32> =
            Rc::new(|_v| Box::pin(async move { Err(QueryError::new(crate::error::QueryErrorKind::Server, "nope")) }));
        let callbacks = MutationCallbacks {
            on_success: None,
            on_error: Some(Rc::new(move |_err: &QueryError, _vars: &i32| error_calls_cb.set(error_calls_cb.get() + 1))),
            on_settled: None,
        };
        let mutation = Mutation::new(mutation_fn, callbacks);

        let result = Mutation::mutate(mutation.clone(), 1).await;
        assert_eq!(result, None);
        assert!(mutation.signals().status.get().is_error());
        assert_eq!(error_calls.get(), 1);
    }

    #[tokio::test]
    async fn reset_returns_to_idle() {
        let mutation_fn: MutationFn<i32, i32> = Rc::new(|v| Box::pin(async move { Ok(v) }));
        let mutation = Mutation::new(mutation_fn, MutationCallbacks::default());
        Mutation::mutate(mutation.clone(), 1).await;
        mutation.reset();
        assert_eq!(mutation.signals().status.get(), QueryStatus::Idle);
        assert_eq!(mutation.signals().data.get(), None);
    }

    #[tokio::test]
    async fn dispose_prevents_signal_writes() {
        let mutation_fn: MutationFn<i32, i32> = Rc::new(|v| Box::pin(async move { Ok(v) }));
        let mutation = Mutation::new(mutation_fn, MutationCallbacks::default());
        mutation.dispose();
        Mutation::mutate(mutation.clone(), 1).await;
        assert_eq!(mutation.signals().data.get(), None);
    }
}
