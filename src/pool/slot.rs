use std::time::{Duration, Instant};

/// One resource tracked by a pool, with its lifecycle timestamps
#[derive(Debug)]
pub struct PoolSlot<R> {
    pub id: u64,
    pub created_at: Instant,
    pub last_used_at: Instant,
    /// Cleared when a health check fails or a caller marks the slot bad
    pub healthy: bool,
    resource: R,
}

impl<R> PoolSlot<R> {
    pub fn new(id: u64, resource: R) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            healthy: true,
            resource,
        }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn resource_mut(&mut self) -> &mut R {
        &mut self.resource
    }

    pub fn into_resource(self) -> R {
        self.resource
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }
}
