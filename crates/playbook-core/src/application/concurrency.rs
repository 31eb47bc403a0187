use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Caps how many store-bound operations run at the same time
#[derive(Debug, Clone)]
pub struct WorkerLimit {
    name: &'static str,
    max_concurrent: usize,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
}

impl WorkerLimit {
    /// Create a limit; `0` is raised to `1` so work always progresses
    pub fn new(name: &'static str, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            name,
            max_concurrent,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Maximum number of operations in flight
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Operations currently holding a permit
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Run one operation once a permit is free
    pub async fn run<F, T>(&self, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so a failed acquire can only mean
        // shutdown; the operation then runs unthrottled.
        let _permit = self.permits.acquire().await.ok();

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(limit = self.name, active, max = self.max_concurrent, "Worker slot acquired");

        let result = operation.await;

        let active = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(limit = self.name, active, max = self.max_concurrent, "Worker slot released");
        result
    }

    /// Run every operation under this limit and collect the results in input order
    pub async fn run_all<I, F, T>(&self, operations: I) -> Vec<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T>,
    {
        futures::future::join_all(operations.into_iter().map(|op| self.run(op))).await
    }
}
