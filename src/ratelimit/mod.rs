//! Fixed-window rate limiting over a shared counter store.

mod key;
mod limiter;
mod options;

pub use key::CounterKey;
pub use limiter::{Admission, RateLimiter};
pub use options::{
    LimiterConfig, LimiterOptions, DEFAULT_ACTION, DEFAULT_NAMESPACE, DEFAULT_WINDOW,
};
