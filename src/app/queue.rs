use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Runs detached tasks with at most `max_concurrency` executing at once.
///
/// Spawned work is owned by the runtime, not by whoever enqueued it, so dropping the caller
/// never cancels a task.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

impl WorkQueue {
    pub fn new(max_concurrency: usize) -> Self {
        let permits = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            max_concurrency: permits,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Tasks currently holding a permit.
    pub fn running(&self) -> usize {
        self.max_concurrency
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                tracing::error!("work queue is closed; dropping task");
                return;
            };
            fut.await;
        });
    }
}
