//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, trace, warn};

use super::key::CounterKey;
use super::options::LimiterConfig;
use crate::error::{RatewardenError, Result, StoreOp};
use crate::store::{parse_counter, CounterStore, StoreError, TakeOutcome};

/// The result of one rate limit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the event may proceed
    pub allowed: bool,
    /// Quota left in the current window after this decision
    pub remaining: u64,
    /// Time until the current window ends, if the store reported it
    pub reset_after: Option<Duration>,
}

/// A fixed-window rate limiter whose counters live in a shared store.
///
/// The limiter itself holds no counts, only its configuration and a handle to
/// the store, so it can be shared freely across tasks, and any number of
/// limiters in any number of processes with equal configurations enforce one
/// common quota per identifier.
pub struct RateLimiter<S: ?Sized> {
    store: Arc<S>,
    config: LimiterConfig,
}

impl<S: ?Sized> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for RateLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: CounterStore + ?Sized> RateLimiter<S> {
    /// Create a limiter bound to `store`. Performs no I/O.
    pub fn new(store: Arc<S>, config: LimiterConfig) -> Self {
        Self { store, config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Get the store handle.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The store key used for `identifier`.
    pub fn key(&self, identifier: &str) -> CounterKey {
        CounterKey::new(&self.config, identifier)
    }

    /// Report whether the next event for `identifier` may proceed, consuming
    /// one unit of quota if it may.
    ///
    /// An `Err` means the decision is unknown. It must not be read as a denial.
    pub async fn allow(&self, identifier: &str) -> Result<bool> {
        Ok(self.check(identifier).await?.allowed)
    }

    /// Like [`allow`](Self::allow), also reporting the remaining quota and
    /// the time until the window resets.
    #[instrument(
        level = "trace",
        skip(self),
        fields(namespace = %self.config.namespace(), action = %self.config.action())
    )]
    pub async fn check(&self, identifier: &str) -> Result<Admission> {
        let key = self.key_for(identifier)?;

        let outcome = self
            .store
            .take(key.as_str(), self.config.initial_quota(), self.config.window())
            .await
            .map_err(|e| self.store_failure(StoreOp::Take, &key, e))?;

        match outcome {
            TakeOutcome::Allowed {
                remaining,
                reset_after,
            } => {
                trace!(key = %key, remaining, "Rate limit check passed");
                Ok(Admission {
                    allowed: true,
                    remaining,
                    reset_after,
                })
            }
            TakeOutcome::Denied { reset_after } => {
                debug!(
                    key = %key,
                    capacity = self.config.capacity(),
                    reset_after_ms = reset_after.map(|d| d.as_millis() as u64),
                    "Rate limit exceeded"
                );
                Ok(Admission {
                    allowed: false,
                    remaining: 0,
                    reset_after,
                })
            }
            TakeOutcome::Invalid { value } => Err(self.invalid_counter(&key, value)),
        }
    }

    /// Quota left for `identifier` in the current window, without consuming any.
    ///
    /// An identifier with no live counter has the full quota.
    pub async fn remaining(&self, identifier: &str) -> Result<u64> {
        let key = self.key_for(identifier)?;

        let exists = self
            .store
            .exists(key.as_str())
            .await
            .map_err(|e| self.store_failure(StoreOp::Exists, &key, e))?;
        if !exists {
            return Ok(self.config.initial_quota());
        }

        let raw = match self.store.get(key.as_str()).await {
            Ok(raw) => raw,
            // Expired between the two calls.
            Err(StoreError::Missing(_)) => return Ok(self.config.initial_quota()),
            Err(e) => return Err(self.store_failure(StoreOp::Get, &key, e)),
        };

        parse_counter(&raw).ok_or_else(|| self.invalid_counter(&key, raw))
    }

    /// Drop the counter for `identifier`; its next event opens a fresh window.
    pub async fn reset(&self, identifier: &str) -> Result<()> {
        let key = self.key_for(identifier)?;

        self.store
            .delete(key.as_str())
            .await
            .map_err(|e| self.store_failure(StoreOp::Delete, &key, e))?;

        debug!(key = %key, "Rate limit counter reset");
        Ok(())
    }

    fn key_for(&self, identifier: &str) -> Result<CounterKey> {
        if identifier.is_empty() {
            return Err(RatewardenError::InvalidIdentifier);
        }
        Ok(self.key(identifier))
    }

    fn store_failure(&self, op: StoreOp, key: &CounterKey, source: StoreError) -> RatewardenError {
        warn!(key = %key, op = %op, error = %source, "Counter store operation failed");
        RatewardenError::store(op, key.as_str(), source)
    }

    fn invalid_counter(&self, key: &CounterKey, value: String) -> RatewardenError {
        warn!(key = %key, value = %value, "Stored counter is not a non-negative integer");
        RatewardenError::InvalidCounter {
            key: key.to_string(),
            value,
        }
    }
}
