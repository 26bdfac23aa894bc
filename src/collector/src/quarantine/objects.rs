//! Tagger and sweeper for isolated objects.

use super::{Transition, transition};
use crate::client::ObjectStoreClient;
use crate::config::CollectorConfig;
use crate::metrics::GcMetrics;
use crate::report::StoreReport;
use crate::tombstone::{self, GracePeriod};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct ObjectQuarantine {
    client: Arc<dyn ObjectStoreClient>,
    grace: GracePeriod,
    dry_run: bool,
    metrics: GcMetrics,
}

impl ObjectQuarantine {
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        config: &CollectorConfig,
        metrics: GcMetrics,
    ) -> Self {
        Self {
            client,
            grace: config.grace_period(),
            dry_run: config.dry_run,
            metrics,
        }
    }

    /// Tombstone or sweep every isolated key of `bucket`.
    ///
    /// Each key is handled on its own: a failed tag read, tag write or delete
    /// is recorded in `report` and the remaining keys are still processed.
    pub async fn process(
        &self,
        bucket: &str,
        isolated: &[String],
        now: DateTime<Utc>,
        report: &mut StoreReport,
    ) {
        for key in isolated {
            let tags = match self.client.get_object_tags(bucket, key).await {
                Ok(tags) => tags,
                Err(e) => {
                    tracing::warn!(bucket = %bucket, key = %key, error = %e, "Failed to read object tags");
                    report.record_failure(key.as_str(), e);
                    continue;
                }
            };

            match transition(&tombstone::read_object_marker(&tags), self.grace, now) {
                Transition::Tombstone => self.tombstone(bucket, key, now, report).await,
                Transition::Wait { marked_at } => {
                    tracing::debug!(
                        bucket = %bucket,
                        key = %key,
                        marked_at = %marked_at,
                        "Object within grace period"
                    );
                    report.pending.push(key.clone());
                }
                Transition::Delete { marked_at } => {
                    self.delete(bucket, key, marked_at, report).await
                }
                Transition::Reject { marker } => {
                    tracing::warn!(
                        bucket = %bucket,
                        key = %key,
                        marker = %marker,
                        "Unreadable tombstone marker, leaving object in place"
                    );
                    report.record_failure(
                        key.as_str(),
                        format!("malformed tombstone marker {marker:?}"),
                    );
                }
            }
        }
    }

    async fn tombstone(
        &self,
        bucket: &str,
        key: &str,
        now: DateTime<Utc>,
        report: &mut StoreReport,
    ) {
        if self.dry_run {
            tracing::info!(bucket = %bucket, key = %key, "[DRY-RUN] Would tombstone object");
            report.tombstoned.push(key.to_string());
            return;
        }

        match self
            .client
            .put_object_tag(bucket, key, tombstone::object_marker(now))
            .await
        {
            Ok(()) => {
                tracing::info!(bucket = %bucket, key = %key, "Tombstoned isolated object");
                self.metrics.record_tombstones_written(1);
                report.tombstoned.push(key.to_string());
            }
            Err(e) => {
                tracing::error!(bucket = %bucket, key = %key, error = %e, "Failed to tombstone object");
                report.record_failure(key, e);
            }
        }
    }

    async fn delete(
        &self,
        bucket: &str,
        key: &str,
        marked_at: DateTime<Utc>,
        report: &mut StoreReport,
    ) {
        if self.dry_run {
            tracing::info!(
                bucket = %bucket,
                key = %key,
                marked_at = %marked_at,
                "[DRY-RUN] Would delete isolated object"
            );
            report.deleted.push(key.to_string());
            return;
        }

        match self.client.delete_object(bucket, key).await {
            Ok(()) => {
                tracing::info!(
                    bucket = %bucket,
                    key = %key,
                    marked_at = %marked_at,
                    "Deleted isolated object"
                );
                self.metrics.record_artifacts_deleted(1);
                report.deleted.push(key.to_string());
            }
            Err(e) => {
                tracing::error!(bucket = %bucket, key = %key, error = %e, "Failed to delete object");
                report.record_failure(key, e);
            }
        }
    }
}
