//! Bounded concurrency for expensive asynchronous calls.
//!
//! [`ConcurrencyLimiter`] caps how many invocations run at once. Extra
//! callers wait in FIFO order (tokio's semaphore is fair) and are admitted
//! one at a time as slots free up. A slot is held by a permit guard, so it
//! is returned on success, on error, and when the caller's future is
//! dropped mid-flight.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::trace;

use crate::{AppError, AppResult};

/// Throttle bounding simultaneous in-flight invocations.
///
/// Cheap to clone; clones share the same slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    queued: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    /// Creates a limiter admitting at most `max_concurrency` calls at once.
    ///
    /// # Errors
    ///
    /// `AppError::Validation` if `max_concurrency` is zero or exceeds the
    /// semaphore's capacity.
    pub fn new(max_concurrency: usize) -> AppResult<Self> {
        if max_concurrency < 1 {
            return Err(AppError::validation(
                "max_concurrency",
                "must be at least 1",
                max_concurrency,
            ));
        }
        if max_concurrency > Semaphore::MAX_PERMITS {
            return Err(AppError::validation(
                "max_concurrency",
                format!("must be at most {}", Semaphore::MAX_PERMITS),
                max_concurrency,
            ));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            queued: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of invocations currently running.
    pub fn active(&self) -> usize {
        self.max_concurrency
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Number of callers waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Runs `operation` once a slot is available.
    pub async fn run<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let waiting = Waiting::enter(&self.queued);
        let permit = self.semaphore.acquire().await;
        drop(waiting);

        // Never closed, so acquire cannot fail.
        let _permit = permit.ok();
        trace!(active = self.active(), queued = self.queued(), "Limiter slot acquired");

        operation().await
    }

    /// Wraps `operation` so every call through the result is throttled by
    /// this limiter.
    pub fn wrap<F>(&self, operation: F) -> Limited<F> {
        Limited {
            limiter: self.clone(),
            operation,
        }
    }
}

/// Counts one queued caller until dropped, including when the caller's
/// future is dropped while waiting.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(queued: &'a AtomicUsize) -> Self {
        queued.fetch_add(1, Ordering::SeqCst);
        Self(queued)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An operation throttled by a [`ConcurrencyLimiter`].
#[derive(Debug, Clone)]
pub struct Limited<F> {
    limiter: ConcurrencyLimiter,
    operation: F,
}

impl<F> Limited<F> {
    /// Invokes the wrapped operation with `arg` once a slot is available.
    pub async fn call<A, Fut, T>(&self, arg: A) -> T
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = T>,
    {
        self.limiter.run(|| (self.operation)(arg)).await
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn test_rejects_zero() {
        let err = ConcurrencyLimiter::new(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_n_in_flight_and_fifo() {
        let limiter = ConcurrencyLimiter::new(2).unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(Mutex::new(Vec::new()));

        let op = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            let started = Arc::clone(&started);
            move |i: usize| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                let started = Arc::clone(&started);
                async move {
                    started.lock().push(i);
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    i * 10
                }
            }
        };
        let limited = Arc::new(limiter.wrap(op));

        let mut handles = Vec::new();
        for i in 0..5 {
            let limited = Arc::clone(&limited);
            handles.push(tokio::spawn(async move { limited.call(i).await }));
            // Let the task reach the semaphore before spawning the next one.
            tokio::task::yield_now().await;
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results, vec![0, 10, 20, 30, 40]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(*started.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(limiter.active(), 0);
        assert_eq!(limiter.queued(), 0);
    }

    #[tokio::test]
    async fn test_failures_release_slots() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();

        for _ in 0..3 {
            let result: Result<(), String> = limiter.run(|| async { Err("boom".to_string()) }).await;
            assert!(result.is_err());
        }

        let ok = limiter.run(|| async { 7 }).await;
        assert_eq!(ok, 7);
        assert_eq!(limiter.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_releases_slot() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();

        let slow = limiter.run(|| tokio::time::sleep(Duration::from_secs(3600)));
        let timed_out = tokio::time::timeout(Duration::from_millis(10), slow).await;
        assert!(timed_out.is_err());

        assert_eq!(limiter.active(), 0);
        assert_eq!(limiter.run(|| async { "next" }).await, "next");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_waiter_leaves_queue() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let holder_limiter = limiter.clone();
        let holder = tokio::spawn(async move {
            holder_limiter
                .run(|| tokio::time::sleep(Duration::from_secs(1)))
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(limiter.active(), 1);

        let waiter = limiter.run(|| async {});
        assert!(tokio::time::timeout(Duration::from_millis(10), waiter).await.is_err());
        assert_eq!(limiter.queued(), 0);

        holder.await.unwrap();
        assert_eq!(limiter.active(), 0);
        assert_eq!(limiter.queued(), 0);
    }
}
