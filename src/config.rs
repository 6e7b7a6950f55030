use crate::domain::batch::CompletionPolicy;
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dedup: DedupConfig,
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub lock_stripes: usize,
    pub storage_shards: usize,
    /// Records never expire when unset.
    pub ttl_ms: Option<u64>,
    /// Aggregate messages anyway when the dedup store is unreachable.
    pub fail_open: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            lock_stripes: 64,
            storage_shards: 16,
            ttl_ms: None,
            fail_open: false,
        }
    }
}

impl DedupConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub shards: usize,
    pub size_threshold: usize,
    /// Zero disables timeout completion.
    pub timeout_ms: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            shards: 16,
            size_threshold: 100,
            timeout_ms: 1000,
        }
    }
}

impl AggregationConfig {
    pub fn policy(&self) -> CompletionPolicy {
        CompletionPolicy::new(self.size_threshold, Duration::from_millis(self.timeout_ms))
    }
}

impl AppConfig {
    pub fn from_json_reader<R: Read>(source: R) -> Result<Self> {
        let config: AppConfig = serde_json::from_reader(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("dedup.lock_stripes", self.dedup.lock_stripes),
            ("dedup.storage_shards", self.dedup.storage_shards),
            ("aggregation.shards", self.aggregation.shards),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(CoreError::InvalidPolicy(format!(
                "{name} must be greater than zero"
            )));
        }
        self.aggregation.policy().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_json_reader("{}".as_bytes()).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.dedup.lock_stripes, 64);
        assert_eq!(config.aggregation.policy(), CompletionPolicy::new(100, Duration::from_secs(1)));
        assert_eq!(config.dedup.ttl(), None);
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{ "dedup": { "ttl_ms": 86400000, "fail_open": true },
                        "aggregation": { "size_threshold": 5, "timeout_ms": 0 } }"#;
        let config = AppConfig::from_json_reader(json.as_bytes()).unwrap();

        assert_eq!(config.dedup.ttl(), Some(Duration::from_secs(86_400)));
        assert!(config.dedup.fail_open);
        assert_eq!(config.dedup.storage_shards, 16);
        assert!(!config.aggregation.policy().has_timeout());
        assert_eq!(config.aggregation.size_threshold, 5);
    }

    #[test]
    fn test_zero_counts_rejected() {
        let json = r#"{ "aggregation": { "shards": 0 } }"#;
        let err = AppConfig::from_json_reader(json.as_bytes()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPolicy(msg) if msg.contains("aggregation.shards")));

        let json = r#"{ "aggregation": { "size_threshold": 0 } }"#;
        assert!(matches!(
            AppConfig::from_json_reader(json.as_bytes()),
            Err(CoreError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            AppConfig::from_json_reader("{ not json".as_bytes()),
            Err(CoreError::ConfigError(_))
        ));
    }
}
