//! Configuration management for ratewarden.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RatewardenError, Result};
use crate::ratelimit::{LimiterConfig, LimiterOptions};
use crate::store::RedisStoreConfig;

/// Prefix for environment variable overrides, e.g. `RATEWARDEN__STORE__URL`.
const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for a ratewarden deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Counter store connection settings
    #[serde(default)]
    pub store: RedisStoreConfig,

    /// Named limiter profiles
    #[serde(default)]
    pub limiters: BTreeMap<String, LimiterOptions>,
}

impl AppConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `RATEWARDEN__*` environment overrides.
    ///
    /// Without a file, built-in defaults are the base layer.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| RatewardenError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| RatewardenError::Config(e.to_string()))
    }

    /// Load configuration from a YAML file, without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatewardenError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Resolve the named limiter profile.
    pub fn limiter(&self, name: &str) -> Result<LimiterConfig> {
        self.limiters
            .get(name)
            .cloned()
            .map(LimiterOptions::resolve)
            .ok_or_else(|| RatewardenError::Config(format!("unknown limiter profile: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const YAML: &str = r#"
store:
  url: redis://cache.internal:6379/
  timeout_ms: 250
limiters:
  send_message:
    capacity: 1
    action: send_message
    window_ms: 1000
  signup:
    capacity: 20
    action: signup
    window_ms: 86400000
  card_pay_attempt:
    capacity: 3
    namespace: billing
    action: card_pay_attempt
    window_ms: 86400000
"#;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.store, RedisStoreConfig::default());
        assert!(config.limiters.is_empty());
    }

    #[test]
    fn test_parse_config() {
        let config = AppConfig::from_yaml(YAML).unwrap();

        assert_eq!(config.store.url, "redis://cache.internal:6379/");
        assert_eq!(config.store.timeout_ms, 250);
        assert_eq!(config.limiters.len(), 3);
    }

    #[test]
    fn test_resolve_profile() {
        let config = AppConfig::from_yaml(YAML).unwrap();

        let signup = config.limiter("signup").unwrap();
        assert_eq!(signup.capacity(), 20);
        assert_eq!(signup.namespace(), "user");
        assert_eq!(signup.window(), Duration::from_secs(86400));

        let card = config.limiter("card_pay_attempt").unwrap();
        assert_eq!(card.namespace(), "billing");
    }

    #[test]
    fn test_unknown_profile() {
        let config = AppConfig::from_yaml(YAML).unwrap();
        assert!(matches!(
            config.limiter("missing"),
            Err(RatewardenError::Config(_))
        ));
    }

    #[test]
    fn test_store_section_optional() {
        let config = AppConfig::from_yaml("limiters: {}").unwrap();
        assert_eq!(config.store, RedisStoreConfig::default());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(AppConfig::from_yaml("store: [unterminated").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "ratewarden-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(&path, YAML).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        let parsed = AppConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.limiters.len(), 3);
        assert_eq!(loaded.limiter("send_message").unwrap().capacity(), 1);
        assert_eq!(parsed, AppConfig::from_yaml(YAML).unwrap());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/ratewarden.yaml")));
        assert!(matches!(result, Err(RatewardenError::Config(_))));
    }
}
