//! In-process counter store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::{parse_counter, CounterStore, StoreError, TakeOutcome};

/// Number of `take` calls between sweeps of expired slots.
const PURGE_INTERVAL: u64 = 1024;

/// A stored value and its optional expiry.
#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: String, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: Some(now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn ttl(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

/// A [`CounterStore`] held in process memory.
///
/// Expiry is lazy: an expired slot is treated as absent on the next access
/// and replaced or removed then. `take` runs under the map's entry lock for
/// the key, which makes it atomic with respect to every other operation on
/// that key.
///
/// Slots left behind by identifiers that never return are swept every
/// `PURGE_INTERVAL` calls to `take`, so the map stays bounded by the keys
/// that are live within one sweep.
///
/// Counts are only shared between limiters holding the same `MemoryStore`,
/// never between processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    takes: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a raw value with no expiry, bypassing all validation.
    ///
    /// Useful for simulating a counter written by something other than a limiter.
    pub fn insert_raw(&self, key: &str, value: impl Into<String>) {
        self.slots.insert(
            key.to_string(),
            Slot {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    /// Time left before `key` expires. `None` if the key is absent or has no expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.slots
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .and_then(|slot| slot.ttl(now))
    }

    /// Drop every expired slot and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        let removed = before.saturating_sub(self.slots.len());
        trace!(removed, "Purged expired counters");
        removed
    }

    /// Number of slots held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn live_value(&self, key: &str, now: Instant) -> Option<String> {
        let value = {
            let slot = self.slots.get(key)?;
            if slot.is_expired(now) {
                None
            } else {
                Some(slot.value.clone())
            }
        };
        if value.is_none() {
            self.slots.remove_if(key, |_, slot| slot.is_expired(now));
        }
        value
    }

    fn take_locked(&self, key: &str, capacity: u64, ttl: Duration, now: Instant) -> TakeOutcome {
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(capacity.to_string(), ttl, now));
        if slot.is_expired(now) {
            *slot = Slot::new(capacity.to_string(), ttl, now);
        }

        let Some(current) = parse_counter(&slot.value) else {
            return TakeOutcome::Invalid {
                value: slot.value.clone(),
            };
        };

        let reset_after = slot.ttl(now);
        if current == 0 {
            return TakeOutcome::Denied { reset_after };
        }

        let remaining = current - 1;
        slot.value = remaining.to_string();
        TakeOutcome::Allowed {
            remaining,
            reset_after,
        }
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_value(key, Instant::now()).is_some())
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let slot = Slot::new(value.to_string(), ttl, Instant::now());
        self.slots.insert(key.to_string(), slot);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        self.live_value(key, Instant::now())
            .ok_or_else(|| StoreError::Missing(key.to_string()))
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: "0".to_string(),
            expires_at: None,
        });
        if slot.is_expired(now) {
            // Like Redis, decrementing a missing key starts from zero with no expiry.
            *slot = Slot {
                value: "0".to_string(),
                expires_at: None,
            };
        }

        let current: i64 = slot.value.parse().map_err(|_| {
            StoreError::Unavailable("value is not an integer or out of range".to_string())
        })?;
        let next = current.checked_sub(1).ok_or_else(|| {
            StoreError::Unavailable("decrement would overflow".to_string())
        })?;
        slot.value = next.to_string();
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.slots.remove(key);
        Ok(())
    }

    async fn take(
        &self,
        key: &str,
        capacity: u64,
        ttl: Duration,
    ) -> Result<TakeOutcome, StoreError> {
        let outcome = self.take_locked(key, capacity, ttl, Instant::now());

        // The entry lock is released here; sweeping needs every shard.
        if self.takes.fetch_add(1, Ordering::Relaxed) % PURGE_INTERVAL == PURGE_INTERVAL - 1 {
            self.purge_expired();
        }

        Ok(outcome)
    }
}
