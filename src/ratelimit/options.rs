//! Limiter configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "user";
/// Action used when none is configured.
pub const DEFAULT_ACTION: &str = "default_action";
/// Window used when none is configured.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Raw options for one limiter, as written by a caller or read from a file.
///
/// Zero-valued fields are allowed here; they are replaced by defaults when the
/// options are resolved into a [`LimiterConfig`]. In configuration files the
/// window is given as `window_ms`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterOptions {
    /// Maximum allowed events per window. Never defaulted.
    pub capacity: i64,

    /// Groups unrelated limiters sharing one store
    #[serde(default)]
    pub namespace: String,

    /// What is being limited, e.g. "signup"
    #[serde(default)]
    pub action: String,

    /// Window length
    #[serde(default, rename = "window_ms", with = "window_ms")]
    pub window: Duration,
}

impl LimiterOptions {
    /// Options for `capacity` events of `action` per `window`, in the default namespace.
    pub fn new(capacity: i64, action: impl Into<String>, window: Duration) -> Self {
        Self {
            capacity,
            namespace: String::new(),
            action: action.into(),
            window,
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Apply defaults and freeze the options.
    pub fn resolve(self) -> LimiterConfig {
        LimiterConfig::from(self)
    }
}

/// A fully resolved, immutable limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    capacity: i64,
    namespace: String,
    action: String,
    window: Duration,
}

impl LimiterConfig {
    /// Resolve raw field values in one step.
    pub fn new(
        capacity: i64,
        namespace: impl Into<String>,
        action: impl Into<String>,
        window: Duration,
    ) -> Self {
        LimiterOptions {
            capacity,
            namespace: namespace.into(),
            action: action.into(),
            window,
        }
        .resolve()
    }

    /// Maximum allowed events per window, as configured.
    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    /// The quota a fresh window starts with. A capacity of zero or less
    /// starts every window empty.
    pub fn initial_quota(&self) -> u64 {
        u64::try_from(self.capacity).unwrap_or(0)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl From<LimiterOptions> for LimiterConfig {
    fn from(options: LimiterOptions) -> Self {
        let namespace = if options.namespace.is_empty() {
            DEFAULT_NAMESPACE.to_string()
        } else {
            options.namespace
        };
        let action = if options.action.is_empty() {
            DEFAULT_ACTION.to_string()
        } else {
            options.action
        };
        let window = if options.window.is_zero() {
            DEFAULT_WINDOW
        } else {
            options.window
        };

        Self {
            capacity: options.capacity,
            namespace,
            action,
            window,
        }
    }
}

mod window_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_substituted_for_zero_values() {
        let config = LimiterOptions::default().resolve();

        assert_eq!(config.namespace(), "user");
        assert_eq!(config.action(), "default_action");
        assert_eq!(config.window(), Duration::from_secs(1));
        assert_eq!(config.capacity(), 0);
    }

    #[test]
    fn test_explicit_values_kept() {
        let config = LimiterConfig::new(20, "accounts", "signup", Duration::from_secs(86400));

        assert_eq!(config.capacity(), 20);
        assert_eq!(config.namespace(), "accounts");
        assert_eq!(config.action(), "signup");
        assert_eq!(config.window(), Duration::from_secs(86400));
    }

    #[test]
    fn test_capacity_never_defaulted() {
        let config = LimiterOptions::new(0, "send_message", Duration::ZERO).resolve();
        assert_eq!(config.capacity(), 0);
        assert_eq!(config.initial_quota(), 0);

        let config = LimiterOptions::new(-5, "send_message", Duration::ZERO).resolve();
        assert_eq!(config.capacity(), -5);
        assert_eq!(config.initial_quota(), 0);
    }

    #[test]
    fn test_with_namespace() {
        let config = LimiterOptions::new(3, "card_pay_attempt", Duration::from_secs(60))
            .with_namespace("billing")
            .resolve();

        assert_eq!(config.namespace(), "billing");
        assert_eq!(config.action(), "card_pay_attempt");
        assert_eq!(config.initial_quota(), 3);
    }

    #[test]
    fn test_parse_options_from_yaml() {
        let yaml = r#"
capacity: 3
action: signup
window_ms: 86400000
"#;
        let options: LimiterOptions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(options.namespace, "");

        let config = options.resolve();
        assert_eq!(config.capacity(), 3);
        assert_eq!(config.namespace(), "user");
        assert_eq!(config.window(), Duration::from_secs(86400));
    }

    #[test]
    fn test_options_require_capacity() {
        let result = serde_yaml::from_str::<LimiterOptions>("action: signup");
        assert!(result.is_err());
    }
}
