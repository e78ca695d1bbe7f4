//! # Request Deduplication Module
//!
//! Single-flight coordination: while an operation for a key is in flight, every
//! further caller for that key attaches to it instead of starting another one,
//! and all of them receive the same result.
//!
//! ## How it works
//! - The in-flight map holds, per key, a cloneable [`Shared`] handle on the
//!   running operation.
//! - The operation itself runs on its own tokio task. Dropping a waiter (for
//!   example when its caller is cancelled) therefore never cancels the shared
//!   work; it completes and resolves the remaining waiters.
//! - The task removes its own map entry when it finishes, on success and on
//!   failure alike, so a resolved flight never blocks a later one.
//! - The task is spawned after the map lock is released and hands its result
//!   back over a oneshot channel; a task that never runs (runtime shutdown)
//!   resolves its waiters with [`FlightAborted`].

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// The spawned operation panicked or was aborted before producing a result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("in-flight operation aborted: {0}")]
pub struct FlightAborted(pub String);

type Flight<T> = Shared<BoxFuture<'static, Result<T, FlightAborted>>>;
type FlightMap<T> = Arc<Mutex<HashMap<String, Flight<T>>>>;

/// Removes a key from the in-flight map when the owning task ends, panics included
struct FlightGuard<T> {
    in_flight: FlightMap<T>,
    key: String,
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

/// Outcome of joining a flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightOutcome<T> {
    /// Value produced by the shared operation
    pub result: Result<T, FlightAborted>,

    /// Whether this caller attached to a flight started by someone else
    pub joined: bool,
}

/// Single-flight coordinator keyed by string
pub struct SingleFlight<T> {
    in_flight: FlightMap<T>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty coordinator
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `operation` for `key`, or attach to the flight already running for it
    ///
    /// `operation` is only invoked when no flight for `key` exists. Must be
    /// called from within a tokio runtime.
    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> FlightOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (flight, joined, task) = {
            let mut in_flight = self.in_flight.lock();

            match in_flight.get(key) {
                Some(existing) => (existing.clone(), true, None),
                None => {
                    let (flight, task) = self.prepare(key.to_string(), operation());
                    in_flight.insert(key.to_string(), flight.clone());
                    (flight, false, Some(task))
                }
            }
        };

        // Spawned only once the map lock is released: if the runtime is
        // shutting down the task is dropped on the spot, and its guard needs
        // the lock to remove the entry.
        if let Some(task) = task {
            tokio::spawn(task);
        }

        if joined {
            debug!("Joined in-flight operation for key: {}", key);
        }

        FlightOutcome {
            result: flight.await,
            joined,
        }
    }

    /// Number of keys with an operation in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Build the task that drives the operation, and the shareable future
    /// that resolves with its result
    ///
    /// The entry goes away before any waiter sees the result: the guard is
    /// dropped ahead of the send, and on panic it unwinds before the sender.
    fn prepare<Fut>(&self, key: String, operation: Fut) -> (Flight<T>, BoxFuture<'static, ()>)
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let guard = FlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key,
        };
        let (tx, rx) = oneshot::channel();

        let task = async move {
            let tx = tx;
            let guard = guard;
            let result = operation.await;
            drop(guard);
            let _ = tx.send(result);
        }
        .boxed();

        let flight = async move {
            rx.await
                .map_err(|_| FlightAborted("operation panicked or was cancelled".to_string()))
        }
        .boxed()
        .shared();

        (flight, task)
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_operation() {
        let flights = Arc::new(SingleFlight::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let flights = flights.clone();
                let calls = calls.clone();
                let release = release.clone();
                tokio::spawn(async move {
                    flights
                        .run("pokemon/25", move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            release.notified().await;
                            25
                        })
                        .await
                })
            })
            .collect();

        // Let every waiter attach before the operation completes
        while flights.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_one();

        let mut joined = 0;
        for waiter in waiters {
            let outcome = waiter.await.unwrap();
            assert_eq!(outcome.result, Ok(25));
            if outcome.joined {
                joined += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(joined, 7);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_entry_removed_after_completion() {
        let flights = SingleFlight::<&'static str>::new();

        let first = flights.run("item/4", || async { "first" }).await;
        let second = flights.run("item/4", || async { "second" }).await;

        assert_eq!(first.result, Ok("first"));
        assert_eq!(second.result, Ok("second"));
        assert!(!second.joined);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_cancel_flight() {
        let flights = Arc::new(SingleFlight::<u32>::new());
        let release = Arc::new(Notify::new());

        let leader = {
            let flights = flights.clone();
            let release = release.clone();
            tokio::spawn(async move {
                flights
                    .run("move/1", move || async move {
                        release.notified().await;
                        1
                    })
                    .await
            })
        };

        while flights.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let follower = {
            let flights = flights.clone();
            tokio::spawn(async move { flights.run("move/1", || async { 99 }).await })
        };

        leader.abort();
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();

        let outcome = follower.await.unwrap();
        assert_eq!(outcome.result, Ok(1));
        assert!(outcome.joined);
    }

    #[tokio::test]
    async fn test_panicking_operation_reports_abort() {
        let flights = SingleFlight::<u32>::new();

        let outcome = flights
            .run("type/13", || async {
                let missing: Option<u32> = None;
                missing.expect("upstream vanished")
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(flights.in_flight(), 0);
    }

    #[test]
    fn test_run_during_runtime_shutdown_aborts() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let handle = runtime.handle().clone();
        runtime.shutdown_background();

        // The spawned task is dropped immediately; its guard must not
        // contend with the map lock held by `run`
        let _entered = handle.enter();
        let flights = SingleFlight::<u32>::new();
        let outcome = futures::executor::block_on(flights.run("pokemon/1", || async { 1 }));

        assert!(outcome.result.is_err());
        assert!(!outcome.joined);
        assert_eq!(flights.in_flight(), 0);
    }
}
