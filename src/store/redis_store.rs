//! Redis-backed counter store.
//!
//! Counters are plain Redis strings holding the remaining quota, with a
//! millisecond expiry set when the key is created. The decision path runs as
//! a single Lua script so that initialization, validation and the decrement
//! happen atomically on the server, no matter how many processes share the
//! same counters.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult, Script};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{parse_counter, CounterStore, StoreError, TakeOutcome};

/// Initialize-if-absent, validate, then decrement with a floor at zero.
///
/// Validation accepts exactly what [`parse_counter`] accepts, so a value Redis
/// could not `DECR` is reported as invalid instead of failing the script.
///
/// Replies with `{status, value, pttl}` where status is one of `allowed`,
/// `denied` or `invalid`. For `allowed` the value is the quota left after the
/// decrement; for `invalid` it is the raw stored value.
const TAKE_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = ARGV[1]
local window_ms = ARGV[2]

if redis.call("EXISTS", key) == 0 then
    redis.call("SET", key, capacity, "PX", window_ms)
end

local raw = redis.call("GET", key)
local ttl = redis.call("PTTL", key)

local canonical = raw == "0" or string.match(raw, "^[1-9]%d*$") ~= nil
local too_big = #raw > 19 or (#raw == 19 and raw > "9223372036854775807")
if not canonical or too_big then
    return {"invalid", raw, ttl}
end

if tonumber(raw) <= 0 then
    return {"denied", raw, ttl}
end

local remaining = redis.call("DECR", key)
return {"allowed", tostring(remaining), ttl}
"#;

/// Connection settings for [`RedisStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Timeout applied to connecting and to every store operation, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_timeout_ms() -> u64 {
    500
}

impl RedisStoreConfig {
    /// The per-operation timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A [`CounterStore`] backed by Redis.
///
/// Cloning is cheap: clones share the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    timeout: Duration,
    take_script: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis at `url` with the default timeout.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_config(RedisStoreConfig {
            url: url.to_string(),
            ..RedisStoreConfig::default()
        })
        .await
    }

    /// Connect to Redis with custom settings.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection cannot be
    /// established within the configured timeout.
    pub async fn connect_with_config(config: RedisStoreConfig) -> Result<Self, StoreError> {
        let timeout = config.timeout();
        let client = Client::open(config.url.as_str())?;
        let connection = with_timeout(timeout, ConnectionManager::new(client)).await?;

        info!(
            url = %config.url,
            timeout_ms = config.timeout_ms,
            "Connected to Redis counter store"
        );

        Ok(Self::from_connection_manager(connection, timeout))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection_manager(connection: ConnectionManager, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
            take_script: Script::new(TAKE_SCRIPT),
        }
    }

    /// The timeout applied to every operation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Run a Redis future, failing with [`StoreError::Timeout`] if it takes longer than `limit`.
async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Redis rejects a zero expiry, so sub-millisecond windows round up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn reset_after(pttl: i64) -> Option<Duration> {
    u64::try_from(pttl).ok().map(Duration::from_millis)
}

/// Decode the reply of [`TAKE_SCRIPT`].
fn decode_take_reply(status: &str, value: String, pttl: i64) -> Result<TakeOutcome, StoreError> {
    match status {
        "allowed" => {
            let remaining = parse_counter(&value).ok_or_else(|| {
                StoreError::Protocol(format!("take script returned remaining {value:?}"))
            })?;
            Ok(TakeOutcome::Allowed {
                remaining,
                reset_after: reset_after(pttl),
            })
        }
        "denied" => Ok(TakeOutcome::Denied {
            reset_after: reset_after(pttl),
        }),
        "invalid" => Ok(TakeOutcome::Invalid { value }),
        other => Err(StoreError::Protocol(format!(
            "take script returned status {other:?}"
        ))),
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        with_timeout(self.timeout, conn.exists(key)).await
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        with_timeout::<(), _>(self.timeout, conn.pset_ex(key, value, ttl_millis(ttl))).await
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = with_timeout(self.timeout, conn.get(key)).await?;
        value.ok_or_else(|| StoreError::Missing(key.to_string()))
    }

    async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        with_timeout(self.timeout, conn.decr(key, 1)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        with_timeout::<usize, _>(self.timeout, conn.del(key)).await?;
        Ok(())
    }

    async fn take(
        &self,
        key: &str,
        capacity: u64,
        ttl: Duration,
    ) -> Result<TakeOutcome, StoreError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.take_script.key(key);
        invocation.arg(capacity).arg(ttl_millis(ttl));

        let (status, value, pttl): (String, String, i64) =
            with_timeout(self.timeout, invocation.invoke_async(&mut conn))
                .await
                .inspect_err(|e| {
                    warn!(key = %key, error = %e, "Take script failed");
                })?;

        decode_take_reply(&status, value, pttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379/");
        assert_eq!(config.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_config_from_yaml_applies_defaults() {
        let config: RedisStoreConfig = serde_yaml::from_str("url: redis://cache:6380/").unwrap();
        assert_eq!(config.url, "redis://cache:6380/");
        assert_eq!(config.timeout_ms, 500);
    }

    #[test]
    fn test_ttl_millis_rounds_up() {
        assert_eq!(ttl_millis(Duration::from_secs(1)), 1000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::ZERO), 1);
    }

    #[test]
    fn test_decode_take_reply() {
        assert_eq!(
            decode_take_reply("allowed", "4".to_string(), 900).unwrap(),
            TakeOutcome::Allowed {
                remaining: 4,
                reset_after: Some(Duration::from_millis(900)),
            }
        );
        assert_eq!(
            decode_take_reply("denied", "0".to_string(), -1).unwrap(),
            TakeOutcome::Denied { reset_after: None }
        );
        assert_eq!(
            decode_take_reply("invalid", "abc".to_string(), 10).unwrap(),
            TakeOutcome::Invalid {
                value: "abc".to_string()
            }
        );
        assert!(matches!(
            decode_take_reply("allowed", "-1".to_string(), 10),
            Err(StoreError::Protocol(_))
        ));
        assert!(matches!(
            decode_take_reply("bogus", "1".to_string(), 10),
            Err(StoreError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_with_timeout_fails_slow_operation() {
        let limit = Duration::from_millis(20);
        let result =
            with_timeout::<(), _>(limit, std::future::pending::<RedisResult<()>>()).await;

        match result {
            Err(StoreError::Timeout(after)) => assert_eq!(after, limit),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through_result() {
        let value = with_timeout(Duration::from_secs(1), async { Ok::<i64, redis::RedisError>(7) }).await;
        assert_eq!(value.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisStore::connect("not a url").await;
        assert!(matches!(result, Err(StoreError::Redis(_))));
    }
}
