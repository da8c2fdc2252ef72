//! Ratewarden - Distributed Fixed-Window Rate Limiting
//!
//! This crate answers whether the next event for an identifier may proceed,
//! allowing at most N events per fixed window. Counters live in an external
//! key-value store (Redis in production) so that every process pointed at the
//! same store enforces one shared quota.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use error::{RatewardenError, Result};
pub use ratelimit::{Admission, LimiterConfig, LimiterOptions, RateLimiter};
pub use store::{CounterStore, MemoryStore, RedisStore};
