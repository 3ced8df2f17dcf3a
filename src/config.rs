//! Configuration for backend adapters
//!
//! Provides a builder pattern for the tunables every adapter shares: native batch
//! ceilings, retry policy for unprocessed items, paging, and identity defaults.

use std::time::Duration;

/// Adapter configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum items per native batch write request
    pub batch_write_limit: usize,
    /// Maximum keys per native batch read request
    pub batch_read_limit: usize,
    /// How many times unprocessed batch items are resubmitted
    pub max_batch_retries: u32,
    /// Base delay between resubmissions (doubled on every attempt)
    pub retry_backoff: Duration,
    /// Page size used when scanning or listing natively
    pub page_size: usize,
    /// Upper bound on OR branches fanned out into independent native queries
    pub max_filter_branches: usize,
    /// Overrides the backend's default identity field name
    pub default_id_field: Option<String>,
    /// Partition used when a partitioned-table record carries none
    pub default_partition_key: String,
    /// Whether resolved key descriptors are cached per table name
    pub cache_key_descriptors: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_write_limit: 25,
            batch_read_limit: 100,
            max_batch_retries: 3,
            retry_backoff: Duration::from_millis(50),
            page_size: 1000,
            max_filter_branches: 32,
            default_id_field: None,
            default_partition_key: "default".to_string(),
            cache_key_descriptors: true,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::new()
    }

    /// Limits of a DynamoDB-like service (25 writes, 100 reads per batch)
    pub fn dynamo() -> Self {
        Self::default()
    }

    /// Limits of a SimpleDB-like service (25 writes per batch, 20 names per IN clause)
    pub fn simpledb() -> Self {
        Self {
            batch_write_limit: 25,
            batch_read_limit: 20,
            page_size: 2500,
            ..Self::default()
        }
    }

    /// Limits of a CouchDB-like document store
    pub fn couch() -> Self {
        Self {
            batch_write_limit: 1000,
            batch_read_limit: 1000,
            ..Self::default()
        }
    }

    /// Limits of a partitioned table service (100 operations per transaction)
    pub fn table() -> Self {
        Self {
            batch_write_limit: 100,
            batch_read_limit: 100,
            ..Self::default()
        }
    }
}

/// Builder for StoreConfig
#[derive(Debug)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreConfigBuilder {
    /// Create a new builder starting from the default limits
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    /// Start from an existing configuration, e.g. one of the family presets
    pub fn from_config(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Set the maximum items per batch write (minimum 1)
    pub fn batch_write_limit(mut self, limit: usize) -> Self {
        self.config.batch_write_limit = limit.max(1);
        self
    }

    /// Set the maximum keys per batch read (minimum 1)
    pub fn batch_read_limit(mut self, limit: usize) -> Self {
        self.config.batch_read_limit = limit.max(1);
        self
    }

    /// Set how often unprocessed items are retried
    pub fn max_batch_retries(mut self, retries: u32) -> Self {
        self.config.max_batch_retries = retries;
        self
    }

    /// Set the base retry backoff
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    /// Set the native page size (minimum 1)
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size.max(1);
        self
    }

    /// Set the OR fan-out cap (minimum 1)
    pub fn max_filter_branches(mut self, max: usize) -> Self {
        self.config.max_filter_branches = max.max(1);
        self
    }

    /// Override the backend's default identity field
    pub fn default_id_field(mut self, field: impl Into<String>) -> Self {
        self.config.default_id_field = Some(field.into());
        self
    }

    /// Set the partition used when records carry none
    pub fn default_partition_key(mut self, partition: impl Into<String>) -> Self {
        self.config.default_partition_key = partition.into();
        self
    }

    /// Enable or disable key descriptor caching (default: true)
    pub fn cache_key_descriptors(mut self, enabled: bool) -> Self {
        self.config.cache_key_descriptors = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> StoreConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Defaults and Presets
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = StoreConfig::builder().build();

        assert_eq!(config.batch_write_limit, 25);
        assert_eq!(config.batch_read_limit, 100);
        assert_eq!(config.max_batch_retries, 3);
        assert_eq!(config.max_filter_branches, 32);
        assert_eq!(config.default_partition_key, "default");
        assert!(config.default_id_field.is_none());
        assert!(config.cache_key_descriptors);
    }

    #[test]
    fn test_family_presets() {
        assert_eq!(StoreConfig::simpledb().batch_read_limit, 20);
        assert_eq!(StoreConfig::simpledb().page_size, 2500);
        assert_eq!(StoreConfig::couch().batch_write_limit, 1000);
        assert_eq!(StoreConfig::table().batch_write_limit, 100);
        assert_eq!(StoreConfig::dynamo().batch_write_limit, 25);
    }

    // =========================================================================
    // Builder
    // =========================================================================

    #[test]
    fn test_builder_overrides() {
        let config = StoreConfig::builder()
            .batch_write_limit(10)
            .batch_read_limit(7)
            .max_batch_retries(0)
            .retry_backoff(Duration::from_millis(1))
            .page_size(3)
            .max_filter_branches(4)
            .default_id_field("uid")
            .default_partition_key("tenant-a")
            .cache_key_descriptors(false)
            .build();

        assert_eq!(config.batch_write_limit, 10);
        assert_eq!(config.batch_read_limit, 7);
        assert_eq!(config.max_batch_retries, 0);
        assert_eq!(config.retry_backoff, Duration::from_millis(1));
        assert_eq!(config.page_size, 3);
        assert_eq!(config.max_filter_branches, 4);
        assert_eq!(config.default_id_field.as_deref(), Some("uid"));
        assert_eq!(config.default_partition_key, "tenant-a");
        assert!(!config.cache_key_descriptors);
    }

    #[test]
    fn test_builder_clamps_zero_limits() {
        let config = StoreConfig::builder()
            .batch_write_limit(0)
            .batch_read_limit(0)
            .page_size(0)
            .max_filter_branches(0)
            .build();

        assert_eq!(config.batch_write_limit, 1);
        assert_eq!(config.batch_read_limit, 1);
        assert_eq!(config.page_size, 1);
        assert_eq!(config.max_filter_branches, 1);
    }

    #[test]
    fn test_builder_from_preset() {
        let config = StoreConfigBuilder::from_config(StoreConfig::couch())
            .max_batch_retries(1)
            .build();

        assert_eq!(config.batch_write_limit, 1000);
        assert_eq!(config.max_batch_retries, 1);
    }

    #[test]
    fn test_builder_debug() {
        let builder = StoreConfig::builder();
        let debug_str = format!("{:?}", builder);
        assert!(debug_str.contains("StoreConfigBuilder"));
    }
}
