//! Bounded worker pool over a fixed task list.
//!
//! Tasks are loaded into a bounded queue sized to the task count, which is
//! closed before any worker starts. Workers pull in queue order and push each
//! result onto a result channel of the same capacity, so no send ever waits.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

/// Number of workers for `targets` tasks with `configured` max parallelism.
///
/// Zero means unbounded: one worker per task.
#[must_use]
pub fn pool_size(configured: usize, targets: usize) -> usize {
    if configured > 0 {
        configured.min(targets)
    } else {
        targets
    }
}

/// A fixed number of concurrent workers.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    /// Run `work` over every item and collect the results in completion order.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, work: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let (task_tx, task_rx) = async_channel::bounded(total);
        for item in items {
            // Capacity equals the item count, so this never waits.
            if task_tx.send(item).await.is_err() {
                break;
            }
        }
        task_tx.close();

        let (result_tx, result_rx) = async_channel::bounded(total);
        let work = Arc::new(work);
        let workers = self.size.clamp(1, total);
        debug!(workers, tasks = total, "Starting worker pool");

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let tasks = task_rx.clone();
                let results = result_tx.clone();
                let work = Arc::clone(&work);
                tokio::spawn(async move {
                    while let Ok(item) = tasks.recv().await {
                        let result = work(item).await;
                        if results.send(result).await.is_err() {
                            break;
                        }
                    }
                    debug!(worker, "Worker finished");
                })
            })
            .collect();
        drop(result_tx);

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task failed");
            }
        }
        result_rx.close();

        let mut results = Vec::with_capacity(total);
        while let Ok(result) = result_rx.try_recv() {
            results.push(result);
        }
        results
    }
}
