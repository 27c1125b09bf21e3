use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

/// Bounded executor slots.
///
/// At most `capacity` futures run through [`WorkerPool::run`] at once.
/// Excess callers wait instead of being rejected, and tokio's semaphore is
/// fair, so waiting callers are admitted in the order they arrived.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    semaphore: Semaphore,
    capacity: usize,
    in_flight: AtomicUsize,
    queued: AtomicUsize,
}

// Decrements a counter when dropped, so cancelled callers are not counted.
struct CountGuard<'a>(&'a AtomicUsize);

impl<'a> CountGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Semaphore::new(capacity),
                capacity,
                in_flight: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Waits for a slot, then drives `fut` to completion while holding it.
    pub async fn run<F>(&self, fut: F) -> F::Output
    where
        F: Future,
    {
        let permit = {
            let _queued = CountGuard::enter(&self.inner.queued);
            if self.inner.semaphore.available_permits() == 0 {
                debug!(
                    capacity = self.inner.capacity,
                    queued = self.queued(),
                    "worker pool saturated, queueing"
                );
            }
            // The semaphore is owned here and never closed.
            self.inner.semaphore.acquire().await.ok()
        };
        let _in_flight = CountGuard::enter(&self.inner.in_flight);
        let output = fut.await;
        drop(permit);
        output
    }
}
