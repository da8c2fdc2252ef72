//! Counter key composition.

use std::fmt;

use super::options::LimiterConfig;

/// The store key of one counter.
///
/// A key scopes a counter to one identifier performing one action within one
/// namespace, serialized as `{namespace}_{identifier}_{action}`. Equal
/// identifiers under equal configurations always produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey(String);

impl CounterKey {
    /// Compose the key for `identifier` under `config`.
    pub fn new(config: &LimiterConfig, identifier: &str) -> Self {
        Self(format!(
            "{}_{}_{}",
            config.namespace(),
            identifier,
            config.action()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CounterKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_key_layout() {
        let config = LimiterConfig::new(1, "", "send_message", Duration::from_secs(1));
        let key = CounterKey::new(&config, "10.0.0.1");

        assert_eq!(key.as_str(), "user_10.0.0.1_send_message");
        assert_eq!(key.to_string(), "user_10.0.0.1_send_message");
    }

    #[test]
    fn test_key_equality() {
        let config = LimiterConfig::new(3, "", "signup", Duration::from_secs(86400));

        assert_eq!(
            CounterKey::new(&config, "user42"),
            CounterKey::new(&config, "user42")
        );
        assert_ne!(
            CounterKey::new(&config, "user42"),
            CounterKey::new(&config, "user43")
        );
    }

    #[test]
    fn test_key_separates_namespace_and_action() {
        let window = Duration::from_secs(1);
        let signup = LimiterConfig::new(1, "web", "signup", window);
        let login = LimiterConfig::new(1, "web", "login", window);
        let mobile = LimiterConfig::new(1, "mobile", "signup", window);

        let a = CounterKey::new(&signup, "id");
        let b = CounterKey::new(&login, "id");
        let c = CounterKey::new(&mobile, "id");

        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
