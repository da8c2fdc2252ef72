//! Shared counter stores.
//!
//! The limiter keeps no counts in process memory. Every counter lives in a
//! store reached through [`CounterStore`], so any number of processes pointed
//! at the same store share one quota per key. [`RedisStore`] is the
//! production backend; [`MemoryStore`] serves tests and single-process use.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis_store::{RedisStore, RedisStoreConfig};

/// Errors raised while talking to a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("key not found: {0}")]
    Missing(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

/// What a single atomic [`CounterStore::take`] observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TakeOutcome {
    /// One unit of quota was consumed.
    Allowed {
        /// Quota left in the window after this call.
        remaining: u64,
        /// Time until the store expires the counter, if it has an expiry.
        reset_after: Option<Duration>,
    },
    /// The counter was already at zero. Nothing was consumed.
    Denied { reset_after: Option<Duration> },
    /// The stored value is not a non-negative integer. Nothing was changed.
    Invalid { value: String },
}

/// The operations the limiter requires of a shared key-value store.
///
/// `take` is the only operation on the decision path and must be atomic per
/// key: initialize-if-absent, validate, and decrement-with-floor happen as one
/// unit, so concurrent callers can never drive a counter below zero.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Whether `key` currently exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Set `key` to `value`, expiring after `ttl`.
    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError>;

    /// Read the raw value of `key`. Fails with [`StoreError::Missing`] if absent.
    async fn get(&self, key: &str) -> Result<String, StoreError>;

    /// Decrement the integer at `key` by one and return the new value.
    async fn decr(&self, key: &str) -> Result<i64, StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically consume one unit from the counter at `key`.
    ///
    /// If the key is absent it is created with `capacity` and an expiry of
    /// `ttl`. The expiry is never touched on an existing key.
    async fn take(&self, key: &str, capacity: u64, ttl: Duration)
        -> Result<TakeOutcome, StoreError>;
}

/// Parse a stored counter, accepting only plain non-negative integers.
///
/// The accepted range is what Redis can decrement: no sign, no leading zeros,
/// and at most `i64::MAX`.
pub(crate) fn parse_counter(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if raw.len() > 1 && raw.starts_with('0') {
        return None;
    }
    let value: i64 = raw.parse().ok()?;
    u64::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter() {
        assert_eq!(parse_counter("0"), Some(0));
        assert_eq!(parse_counter("42"), Some(42));
        assert_eq!(parse_counter("-1"), None);
        assert_eq!(parse_counter("+1"), None);
        assert_eq!(parse_counter(" 1"), None);
        assert_eq!(parse_counter("1.5"), None);
        assert_eq!(parse_counter(""), None);
        assert_eq!(parse_counter("abc"), None);
    }

    #[test]
    fn test_parse_counter_range() {
        assert_eq!(parse_counter("9223372036854775807"), Some(i64::MAX as u64));
        assert_eq!(parse_counter("9223372036854775808"), None);
        assert_eq!(parse_counter("18446744073709551615"), None);
        assert_eq!(parse_counter("100000000000000000000"), None);
        assert_eq!(parse_counter("007"), None);
        assert_eq!(parse_counter("00"), None);
    }
}
