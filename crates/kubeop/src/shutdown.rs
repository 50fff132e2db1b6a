//! Cleanup callbacks run when the process is interrupted.
//!
//! One [`ShutdownRegistry`] is built in `main` and shared by reference with
//! every component that creates cluster resources needing removal on Ctrl+C.
//! Entries are never removed individually; [`ShutdownRegistry::run_all`]
//! drains and invokes all of them from the signal-handling path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use futures::future::{join_all, BoxFuture};
use tracing::debug;

type Callback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Process-wide collection of cleanup callbacks.
#[derive(Default)]
pub struct ShutdownRegistry {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, Callback>>,
}

impl std::fmt::Debug for ShutdownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

impl ShutdownRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cleanup callback and return its registration id.
    pub fn register<F>(&self, callback: F) -> u64
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(id, Box::new(callback));
        debug!(id, "Registered shutdown callback");
        id
    }

    /// Number of callbacks not yet invoked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every registered callback concurrently and wait for all of them.
    ///
    /// Callbacks run at most once; a second call only sees entries registered
    /// after the first.
    pub async fn run_all(&self) {
        let drained: Vec<Callback> = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *entries).into_values().collect()
        };

        debug!(count = drained.len(), "Running shutdown callbacks");
        join_all(drained.into_iter().map(|callback| callback())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_all_invokes_every_callback_once() {
        let registry = ShutdownRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            registry.register(move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            });
        }
        assert_eq!(registry.len(), 3);

        registry.run_all().await;
        registry.run_all().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = Arc::new(ShutdownRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.register(|| async {}.boxed()) })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();

        assert_eq!(ids.len(), 16);
        assert_eq!(registry.len(), 16);
    }
}
