//! Small platform shims shared by the rest of the crate: an async sleep and
//! a same-thread task spawn, each split between a `native` (`tokio`) and a
//! `wasm` (`gloo-timers`/`wasm-bindgen-futures`) implementation behind
//! `cfg_if!`, the same way the teacher splits `ssr`/`hydrate` code paths in
//! `instant.rs` and `query_executor.rs`. Also a short random-ish id generator
//! for mutation instances (spec §4.6: "mutations by generated string id").

use std::future::Future;
use std::time::Duration;

cfg_if::cfg_if! {
    if #[cfg(feature = "wasm")] {
        pub async fn sleep(duration: Duration) {
            gloo_timers::future::TimeoutFuture::new(duration.as_millis() as u32).await;
        }

        /// Spawn a `!Send` future on the current thread's microtask queue.
        pub fn spawn_local<F>(future: F)
        where
            F: Future<Output = ()> + 'static,
        {
            wasm_bindgen_futures::spawn_local(future);
        }
    } else {
        pub async fn sleep(duration: Duration) {
            tokio::time::sleep(duration).await;
        }

        /// Spawn a `!Send` future on the current `tokio::task::LocalSet`.
        /// Callers that use timers (refetch intervals, request timeouts) must
        /// run inside a `LocalSet`, same as any other `Rc`-based single
        /// threaded async component.
        pub fn spawn_local<F>(future: F)
        where
            F: Future<Output = ()> + 'static,
        {
            tokio::task::spawn_local(future);
        }
    }
}

/// A process-unique-enough id for an ad hoc [`Mutation`](crate::Mutation)
/// instance (spec §4.6: "a separate map holds mutations by generated string
/// id"). Not cryptographically random; collisions are astronomically
/// unlikely for a single process's lifetime.
pub fn generate_id() -> String {
    use std::cell::Cell;
    use std::time::{SystemTime, UNIX_EPOCH};

    thread_local! {
        static COUNTER: Cell<u64> = const { Cell::new(0) };
    }

    let count = COUNTER.with(|c| {
        let next = c.get().wrapping_add(1);
        c.set(next);
        next
    });
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("mutation_{nanos:x}_{count:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }
}
