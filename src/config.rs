//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::limit::{Policy, DEFAULT_NAMESPACE};

/// Main configuration for a Tollgate deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Counter store configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Key namespace isolating this deployment's counters
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Window limits, finest interval first by convention
    #[serde(default)]
    pub limits: Vec<LimitEntry>,
}

impl Default for TollgateConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            namespace: default_namespace(),
            limits: Vec::new(),
        }
    }
}

/// Counter store connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_pool_size() -> usize {
    16
}

/// One window limit as configured: `threshold` grants per `interval_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitEntry {
    pub threshold: u64,
    pub interval_ms: u64,
}

impl LimitEntry {
    /// Validate the entry into a [`Policy`].
    pub fn to_policy(&self) -> Result<Policy> {
        Policy::new(self.threshold, Duration::from_millis(self.interval_ms))
    }
}

impl TollgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configured limits into policies, in configured order.
    pub fn policies(&self) -> Result<Vec<Policy>> {
        self.limits.iter().map(LimitEntry::to_policy).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.namespace, "tollgate");
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
        assert_eq!(config.redis.pool_size, 16);
        assert!(config.limits.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
redis:
  url: redis://redis.internal:6379
  pool_size: 32
namespace: billing
limits:
  - threshold: 2
    interval_ms: 1000
  - threshold: 9
    interval_ms: 5000
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.namespace, "billing");
        assert_eq!(config.redis.pool_size, 32);

        let policies = config.policies().unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].threshold(), 2);
        assert_eq!(policies[1].interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let yaml = r#"
limits:
  - threshold: 42
    interval_ms: 60000
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.namespace, "tollgate");
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
        assert_eq!(config.policies().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_limit_rejected_at_validation() {
        let yaml = r#"
limits:
  - threshold: 0
    interval_ms: 1000
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        let err = config.policies().unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_unparseable_yaml_is_a_config_error() {
        let err = TollgateConfig::from_yaml("limits: {not a list}").unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }
}
