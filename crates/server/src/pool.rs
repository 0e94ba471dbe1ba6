//! Bounded concurrency for request dispatch.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Runs submitted request handlers with at most `size` in progress.
///
/// Jobs started by a handler run on their own threads and are not bounded
/// by the pool.
#[derive(Debug, Clone)]
pub struct DispatchPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl DispatchPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue `work`; it starts once a permit is free.
    pub fn submit<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            work.await;
        });
    }
}
