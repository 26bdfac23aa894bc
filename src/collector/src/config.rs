//! Collector run configuration.

use crate::client::Tag;
use crate::error::{GcError, GcResult};
use crate::tombstone::GracePeriod;
use common::StoreKind;
use common::config::Configuration;
use serde::{Deserialize, Serialize};

/// Upper bound on digests per batched image delete accepted by the registry.
pub const MAX_DELETE_BATCH_SIZE: usize = 100;

/// Configuration of one collection run.
///
/// ## Defaults
///
/// - `store_kind`: both stores
/// - `dry_run`: false
/// - `in_isolation_for_days`: 7
/// - `managed_repository_tag`: `awscdk:asset=true`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Stores covered by the run.
    pub store_kind: StoreKind,

    /// Classify and report only. No tag or delete call is issued.
    pub dry_run: bool,

    /// Days an artifact must stay tombstoned before it is deleted.
    pub in_isolation_for_days: u32,

    /// Resolved asset bucket. Required when objects are collected.
    pub bucket: Option<String>,

    /// Scope used for run exclusion (account/region).
    pub scope: String,

    /// Convention tag identifying managed image repositories.
    pub managed_repository_tag: Tag,

    /// Repositories processed concurrently.
    pub repository_concurrency: usize,

    /// Digests per batched image delete.
    pub delete_batch_size: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::from(&Configuration::default())
    }
}

impl From<&Configuration> for CollectorConfig {
    fn from(config: &Configuration) -> Self {
        let settings = &config.collector;
        Self {
            store_kind: settings.store_kind,
            dry_run: settings.dry_run,
            in_isolation_for_days: settings.in_isolation_for_days,
            bucket: config.environment.bucket.clone(),
            scope: config.environment.scope(),
            managed_repository_tag: Tag::new(
                settings.managed_repository_tag_key.clone(),
                settings.managed_repository_tag_value.clone(),
            ),
            repository_concurrency: settings.repository_concurrency,
            delete_batch_size: settings.delete_batch_size,
        }
    }
}

impl CollectorConfig {
    /// Validate the configuration.
    ///
    /// Checks:
    /// - A bucket is set when objects are collected
    /// - Repository concurrency is positive
    /// - Delete batch size is within `1..=100`
    /// - The managed repository tag key is not empty
    pub fn validate(&self) -> GcResult<()> {
        if self.store_kind.includes_objects()
            && self.bucket.as_deref().is_none_or(str::is_empty)
        {
            return Err(GcError::InvalidConfiguration(format!(
                "a bucket is required when collecting {}",
                self.store_kind
            )));
        }

        if self.repository_concurrency == 0 {
            return Err(GcError::InvalidConfiguration(
                "repository_concurrency must be positive".to_string(),
            ));
        }

        if self.delete_batch_size == 0 || self.delete_batch_size > MAX_DELETE_BATCH_SIZE {
            return Err(GcError::InvalidConfiguration(format!(
                "delete_batch_size must be between 1 and {MAX_DELETE_BATCH_SIZE}, got {}",
                self.delete_batch_size
            )));
        }

        if self.managed_repository_tag.key.is_empty() {
            return Err(GcError::InvalidConfiguration(
                "managed repository tag key cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn grace_period(&self) -> GracePeriod {
        GracePeriod::days(self.in_isolation_for_days)
    }

    /// Builder-style override of the store kind.
    pub fn with_store_kind(mut self, store_kind: StoreKind) -> Self {
        self.store_kind = store_kind;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_in_isolation_for_days(mut self, days: u32) -> Self {
        self.in_isolation_for_days = days;
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }
}
