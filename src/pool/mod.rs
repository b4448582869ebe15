//! Bounded, health-checked resource pools
//!
//! A [`Pool`] hands out [`Pooled`] guards. The guard is the only way to reach
//! a pooled resource and it returns the slot when dropped, so release happens
//! on every exit path: normal return, `?`, panic unwinding, and task
//! cancellation. Slots are created lazily up to `max_size`; a semaphore bounds
//! how many are checked out at once, and waiting for a permit is itself
//! bounded by the acquire timeout.
//!
//! Two managers exist: [`HttpClientManager`] for the lightweight fetch path
//! and [`BrowserManager`] for headless rendering.

mod browser;
mod http;
mod slot;

pub use browser::{BrowserInstance, BrowserManager, BrowserSettings};
pub use http::HttpClientManager;
pub use slot::PoolSlot;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Errors surfaced by pool operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Every slot stayed busy for the whole acquire timeout
    #[error("{pool} pool exhausted: no slot free within {waited_ms}ms (max size {max_size})")]
    Exhausted {
        pool: &'static str,
        max_size: usize,
        waited_ms: u64,
    },

    #[error("{pool} pool is shut down")]
    Closed { pool: &'static str },

    #[error("failed to create {pool} resource: {message}")]
    Create { pool: &'static str, message: String },
}

/// Creates, probes and tears down the resources a pool holds
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    type Resource: Send + 'static;

    /// Short name used in logs, metrics and errors
    fn name(&self) -> &'static str;

    async fn create(&self) -> Result<Self::Resource, PoolError>;

    /// Probes an idle resource before it is handed out again
    async fn health_check(&self, _resource: &mut Self::Resource) -> bool {
        true
    }

    /// Tears a retired resource down
    async fn destroy(&self, resource: Self::Resource) {
        drop(resource);
    }
}

/// Pool sizing and slot lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_size: usize,
    /// Slots older than this are retired instead of reused
    pub max_age: Duration,
    /// Idle slots unused for this long are retired
    pub idle_timeout: Duration,
}

impl PoolConfig {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            max_age: Duration::from_secs(600),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Point-in-time pool counters, used for leak detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMetrics {
    pub pool: &'static str,
    pub max_size: usize,
    /// Slots currently checked out
    pub active: usize,
    /// Slots parked in the idle queue
    pub idle: usize,
    /// Slots ever created
    pub created: u64,
    /// Slots retired for age, idleness, failed health checks or shutdown
    pub evictions: u64,
}

struct PoolInner<M: Manager> {
    manager: M,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<PoolSlot<M::Resource>>>,
    next_id: AtomicU64,
    active: AtomicUsize,
    created: AtomicU64,
    evictions: AtomicU64,
}

impl<M: Manager> PoolInner<M> {
    fn pop_idle(&self) -> Option<PoolSlot<M::Resource>> {
        // Most recently used first, so rarely used slots age out
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_back()
    }

    fn idle_len(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            pool: self.manager.name(),
            max_size: self.config.max_size,
            active: self.active.load(Ordering::SeqCst),
            idle: self.idle_len(),
            created: self.created.load(Ordering::SeqCst),
            evictions: self.evictions.load(Ordering::SeqCst),
        }
    }

    fn emit_metrics(&self, event: &'static str) {
        let m = self.metrics();
        tracing::debug!(
            pool = m.pool,
            event,
            active = m.active,
            idle = m.idle,
            created = m.created,
            evictions = m.evictions,
            "pool metrics"
        );
    }

    async fn retire(&self, slot: PoolSlot<M::Resource>, reason: &'static str) {
        self.evictions.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(pool = self.manager.name(), slot = slot.id, reason, "Retiring pool slot");
        self.manager.destroy(slot.into_resource()).await;
    }

    /// Returns a slot from a dropped guard
    fn check_in(self: &Arc<Self>, mut slot: PoolSlot<M::Resource>) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        let now = Instant::now();

        let reason = if self.semaphore.is_closed() {
            Some("pool shut down")
        } else if !slot.healthy {
            Some("marked unhealthy")
        } else if slot.age(now) >= self.config.max_age {
            Some("max age reached")
        } else {
            None
        };

        match reason {
            None => {
                slot.last_used_at = now;
                self.idle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_back(slot);
                self.emit_metrics("release");
            }
            Some(reason) => {
                if slot.healthy {
                    tracing::debug!(pool = self.manager.name(), slot = slot.id, reason, "Retiring slot on release");
                } else {
                    tracing::warn!(pool = self.manager.name(), slot = slot.id, reason, "Retiring slot on release");
                }
                self.evictions.fetch_add(1, Ordering::SeqCst);
                let resource = slot.into_resource();
                // Destroy is async; outside a runtime the resource is just dropped
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        let inner = Arc::clone(self);
                        handle.spawn(async move {
                            inner.manager.destroy(resource).await;
                        });
                    }
                    Err(_) => drop(resource),
                }
                self.emit_metrics("retire");
            }
        }
    }
}

/// A bounded pool of reusable resources
pub struct Pool<M: Manager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Manager> Pool<M> {
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                manager,
                config: PoolConfig { max_size, ..config },
                semaphore: Arc::new(Semaphore::new(max_size)),
                idle: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
                active: AtomicUsize::new(0),
                created: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.manager.name()
    }

    pub fn max_size(&self) -> usize {
        self.inner.config.max_size
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Checks a slot out, waiting at most `timeout` for one to free up
    ///
    /// Idle slots past their age or idle limits are retired on the way, and
    /// the remaining candidate is health-checked before it is handed out.
    /// When nothing is idle a new resource is created.
    pub async fn acquire(&self, timeout: Duration) -> Result<Pooled<M>, PoolError> {
        let pool = self.name();
        let started = Instant::now();

        let permit = match tokio::time::timeout(
            timeout,
            Arc::clone(&self.inner.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed { pool }),
            Err(_) => {
                tracing::warn!(
                    pool,
                    active = self.inner.active.load(Ordering::SeqCst),
                    "Pool exhausted, rejecting acquire"
                );
                return Err(PoolError::Exhausted {
                    pool,
                    max_size: self.max_size(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        while let Some(mut slot) = self.inner.pop_idle() {
            let now = Instant::now();
            if slot.age(now) >= self.inner.config.max_age {
                self.inner.retire(slot, "max age reached").await;
                continue;
            }
            if slot.idle_for(now) >= self.inner.config.idle_timeout {
                self.inner.retire(slot, "idle timeout").await;
                continue;
            }
            if !self.inner.manager.health_check(slot.resource_mut()).await {
                slot.healthy = false;
                tracing::warn!(pool, slot = slot.id, "Pooled resource failed health check");
                self.inner.retire(slot, "failed health check").await;
                continue;
            }
            return Ok(self.checkout(slot, permit));
        }

        // Creation shares the acquire budget with the permit wait
        let remaining = timeout.saturating_sub(started.elapsed());
        let resource = match tokio::time::timeout(remaining, self.inner.manager.create()).await {
            Ok(created) => created?,
            Err(_) => {
                tracing::warn!(pool, "Resource creation outlasted the acquire timeout");
                return Err(PoolError::Exhausted {
                    pool,
                    max_size: self.max_size(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        };
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(pool, slot = id, "Created pool slot");
        Ok(self.checkout(PoolSlot::new(id, resource), permit))
    }

    fn checkout(&self, mut slot: PoolSlot<M::Resource>, permit: OwnedSemaphorePermit) -> Pooled<M> {
        slot.last_used_at = Instant::now();
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        self.inner.emit_metrics("acquire");
        Pooled {
            slot: Some(slot),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        }
    }

    /// Returns a slot to the pool; equivalent to dropping the guard
    pub fn release(&self, resource: Pooled<M>) {
        drop(resource);
    }

    /// Probes a checked-out resource, marking it for retirement if it fails
    pub async fn health_check(&self, resource: &mut Pooled<M>) -> bool {
        let healthy = self.inner.manager.health_check(resource.deref_mut()).await;
        if !healthy {
            resource.mark_unhealthy();
        }
        healthy
    }

    /// Retires idle slots past their age or idle limits
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<PoolSlot<M::Resource>> = {
            let mut idle = self.inner.idle.lock().unwrap_or_else(PoisonError::into_inner);
            let (expired, keep): (VecDeque<_>, VecDeque<_>) = idle.drain(..).partition(|slot| {
                slot.age(now) >= self.inner.config.max_age
                    || slot.idle_for(now) >= self.inner.config.idle_timeout
            });
            *idle = keep;
            expired.into_iter().collect()
        };

        let count = expired.len();
        for slot in expired {
            self.inner.retire(slot, "expired").await;
        }
        if count > 0 {
            self.inner.emit_metrics("evict");
        }
        count
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics()
    }

    /// Stops handing out slots and destroys every idle resource
    ///
    /// Guards still checked out are retired when they are dropped.
    pub async fn shutdown(&self) {
        self.inner.semaphore.close();
        let drained: Vec<PoolSlot<M::Resource>> = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for slot in drained {
            self.inner.retire(slot, "pool shut down").await;
        }
        tracing::info!(pool = self.name(), "Pool shut down");
        self.inner.emit_metrics("shutdown");
    }
}

/// A checked-out pool slot; dropping it releases the slot
pub struct Pooled<M: Manager> {
    slot: Option<PoolSlot<M::Resource>>,
    pool: Arc<PoolInner<M>>,
    // Declared last: the permit is freed only after Drop has parked the slot
    _permit: OwnedSemaphorePermit,
}

impl<M: Manager> Pooled<M> {
    fn slot(&self) -> &PoolSlot<M::Resource> {
        self.slot.as_ref().expect("pool slot is only taken in Drop")
    }

    pub fn id(&self) -> u64 {
        self.slot().id
    }

    pub fn created_at(&self) -> Instant {
        self.slot().created_at
    }

    pub fn is_healthy(&self) -> bool {
        self.slot().healthy
    }

    /// Retire this slot instead of returning it to the idle queue
    pub fn mark_unhealthy(&mut self) {
        if let Some(slot) = self.slot.as_mut() {
            slot.healthy = false;
        }
    }
}

impl<M: Manager> Deref for Pooled<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        self.slot().resource()
    }
}

impl<M: Manager> DerefMut for Pooled<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.slot
            .as_mut()
            .expect("pool slot is only taken in Drop")
            .resource_mut()
    }
}

impl<M: Manager> fmt::Debug for Pooled<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Pooled");
        debug.field("pool", &self.pool.manager.name());
        if let Some(slot) = self.slot.as_ref() {
            debug.field("id", &slot.id).field("healthy", &slot.healthy);
        }
        debug.finish()
    }
}

impl<M: Manager> Drop for Pooled<M> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.check_in(slot);
        }
    }
}
