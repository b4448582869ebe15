//! In-flight request coalescing
//!
//! Concurrent callers asking for the same key share one underlying future.
//! The map only holds weak handles: when every caller awaiting a computation
//! has been dropped (cancelled or timed out), the computation itself is
//! dropped too, which cancels its task tree and releases whatever pool slots
//! it was holding. A later caller then starts a fresh computation.

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

type SharedComputation<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;
type WeakComputation<V, E> = WeakShared<BoxFuture<'static, Result<V, E>>>;

/// Deduplicates concurrent computations by key
pub struct Coalescer<K, V, E> {
    inflight: Mutex<HashMap<K, (u64, WeakComputation<V, E>)>>,
    next_id: AtomicU64,
    joined: AtomicU64,
}

impl<K, V, E> Coalescer<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Runs `make()` for `key`, or joins the computation already running for it
    ///
    /// `make` is only invoked when no live computation exists for the key.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let (id, shared) = self.join_or_start(&key, make);
        let result = shared.await;

        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if inflight.get(&key).map(|(current, _)| *current) == Some(id) {
            inflight.remove(&key);
        }

        result
    }

    fn join_or_start<F, Fut>(&self, key: &K, make: F) -> (u64, SharedComputation<V, E>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some((id, weak)) = inflight.get(key) {
            if let Some(shared) = weak.upgrade() {
                self.joined.fetch_add(1, Ordering::Relaxed);
                return (*id, shared);
            }
        }

        // Abandoned computations leave dead weak handles behind
        inflight.retain(|_, (_, weak)| weak.upgrade().is_some());

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = make().boxed().shared();
        if let Some(weak) = shared.downgrade() {
            inflight.insert(key.clone(), (id, weak));
        }
        (id, shared)
    }

    /// Number of keys with a live computation
    pub fn in_flight(&self) -> usize {
        let inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        inflight
            .values()
            .filter(|(_, weak)| weak.upgrade().is_some())
            .count()
    }

    /// How many callers joined an existing computation instead of starting one
    pub fn joined(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }
}

impl<K, V, E> Default for Coalescer<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
