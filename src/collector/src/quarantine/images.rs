//! Tagger and sweeper for isolated image digests.
//!
//! The registry has no per-image metadata tags, so the tombstone is an extra
//! image tag pushed against the digest's existing manifest. Each digest gets
//! its own marker tag. Manifest reads
//! and deletes go through batched registry calls of at most
//! `delete_batch_size` digests.

use super::{Transition, transition};
use crate::client::ImageRegistryClient;
use crate::config::CollectorConfig;
use crate::metrics::GcMetrics;
use crate::report::StoreReport;
use crate::scanner::ImageTags;
use crate::tombstone::{self, GracePeriod};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct ImageQuarantine {
    client: Arc<dyn ImageRegistryClient>,
    grace: GracePeriod,
    dry_run: bool,
    batch_size: usize,
    metrics: GcMetrics,
}

impl ImageQuarantine {
    pub fn new(
        client: Arc<dyn ImageRegistryClient>,
        config: &CollectorConfig,
        metrics: GcMetrics,
    ) -> Self {
        Self {
            client,
            grace: config.grace_period(),
            dry_run: config.dry_run,
            batch_size: config.delete_batch_size.max(1),
            metrics,
        }
    }

    /// Tombstone or sweep the isolated digests of `repository`.
    ///
    /// `isolated` maps each isolated digest to all of its tags, markers
    /// included. Failures are recorded per digest in `report`.
    pub async fn process(
        &self,
        repository: &str,
        isolated: &ImageTags,
        now: DateTime<Utc>,
        report: &mut StoreReport,
    ) {
        let mut to_tombstone = Vec::new();
        let mut to_delete = Vec::new();

        for (digest, tags) in isolated {
            match transition(&tombstone::read_image_marker(tags), self.grace, now) {
                Transition::Tombstone => to_tombstone.push(digest.clone()),
                Transition::Wait { marked_at } => {
                    tracing::debug!(
                        repository = %repository,
                        digest = %digest,
                        marked_at = %marked_at,
                        "Image within grace period"
                    );
                    report.pending.push(digest.clone());
                }
                Transition::Delete { .. } => to_delete.push(digest.clone()),
                Transition::Reject { marker } => {
                    tracing::warn!(
                        repository = %repository,
                        digest = %digest,
                        marker = %marker,
                        "Unreadable tombstone marker, leaving image in place"
                    );
                    report.record_failure(
                        digest.as_str(),
                        format!("malformed tombstone marker {marker:?}"),
                    );
                }
            }
        }

        self.tombstone(repository, &to_tombstone, now, report).await;
        self.delete(repository, &to_delete, report).await;
    }

    async fn tombstone(
        &self,
        repository: &str,
        digests: &[String],
        now: DateTime<Utc>,
        report: &mut StoreReport,
    ) {
        if digests.is_empty() {
            return;
        }

        if self.dry_run {
            for digest in digests {
                tracing::info!(
                    repository = %repository,
                    digest = %digest,
                    "[DRY-RUN] Would tombstone image"
                );
            }
            report.tombstoned.extend_from_slice(digests);
            return;
        }

        for batch in digests.chunks(self.batch_size) {
            let manifests = match self.client.get_image_manifests(repository, batch).await {
                Ok(manifests) => manifests,
                Err(e) => {
                    tracing::error!(
                        repository = %repository,
                        digests = batch.len(),
                        error = %e,
                        "Failed to fetch image manifests"
                    );
                    for digest in batch {
                        report.record_failure(digest.as_str(), &e);
                    }
                    continue;
                }
            };

            for digest in batch {
                let Some(manifest) = manifests.get(digest) else {
                    tracing::warn!(repository = %repository, digest = %digest, "Image manifest not found");
                    report.record_failure(digest.as_str(), "image manifest not found");
                    continue;
                };

                let marker = tombstone::image_marker(now, digest);
                match self
                    .client
                    .put_image_tag(repository, digest, manifest, &marker)
                    .await
                {
                    Ok(()) => {
                        tracing::info!(
                            repository = %repository,
                            digest = %digest,
                            tag = %marker,
                            "Tombstoned isolated image"
                        );
                        self.metrics.record_tombstones_written(1);
                        report.tombstoned.push(digest.clone());
                    }
                    Err(e) => {
                        tracing::error!(
                            repository = %repository,
                            digest = %digest,
                            error = %e,
                            "Failed to tombstone image"
                        );
                        report.record_failure(digest.as_str(), e);
                    }
                }
            }
        }
    }

    async fn delete(&self, repository: &str, digests: &[String], report: &mut StoreReport) {
        if digests.is_empty() {
            return;
        }

        let total_batches = digests.len().div_ceil(self.batch_size);
        for (batch_idx, batch) in digests.chunks(self.batch_size).enumerate() {
            tracing::debug!(
                repository = %repository,
                batch = batch_idx + 1,
                total_batches,
                batch_size = batch.len(),
                dry_run = self.dry_run,
                "Processing image deletion batch"
            );

            if self.dry_run {
                for digest in batch {
                    tracing::info!(
                        repository = %repository,
                        digest = %digest,
                        "[DRY-RUN] Would delete isolated image"
                    );
                }
                report.deleted.extend_from_slice(batch);
                continue;
            }

            match self.client.delete_images(repository, batch).await {
                Ok(outcome) => {
                    tracing::info!(
                        repository = %repository,
                        deleted = outcome.deleted.len(),
                        failed = outcome.failures.len(),
                        "Deleted isolated images"
                    );
                    self.metrics.record_artifacts_deleted(outcome.deleted.len());
                    report.deleted.extend(outcome.deleted);
                    for (digest, reason) in outcome.failures {
                        report.record_failure(digest, reason);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        repository = %repository,
                        digests = batch.len(),
                        error = %e,
                        "Failed to delete image batch"
                    );
                    for digest in batch {
                        report.record_failure(digest.as_str(), &e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryEnvironment;
    use crate::client::memory::Mutation;
    use crate::report::StoreTarget;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;

    const REPO: &str = "cdk-images";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn report() -> StoreReport {
        StoreReport::new(StoreTarget::Repository(REPO.to_string()))
    }

    fn config(dry_run: bool) -> CollectorConfig {
        CollectorConfig {
            delete_batch_size: 2,
            ..CollectorConfig::default()
                .with_dry_run(dry_run)
                .with_in_isolation_for_days(1)
        }
    }

    async fn isolated_tags(env: &InMemoryEnvironment, digests: &[&str]) -> ImageTags {
        let mut images = ImageTags::new();
        for digest in digests {
            let tags = env.image_tags(REPO, digest).await.unwrap_or_default();
            images.insert(digest.to_string(), tags.into_iter().collect::<BTreeSet<_>>());
        }
        images
    }

    #[tokio::test]
    async fn test_tombstone_pushes_marker_tag() {
        let env = InMemoryEnvironment::default();
        env.push_image(REPO, "sha256:aaa", &["build-12"]).await;

        let quarantine = ImageQuarantine::new(Arc::new(env.clone()), &config(false), GcMetrics::new());
        let mut report = report();
        let isolated = isolated_tags(&env, &["sha256:aaa"]).await;
        quarantine.process(REPO, &isolated, t0(), &mut report).await;

        assert_eq!(report.tombstoned, vec!["sha256:aaa".to_string()]);
        let tags = env.image_tags(REPO, "sha256:aaa").await.unwrap();
        assert_eq!(tags, vec![
            "build-12".to_string(),
            format!("awscdk.isolated-{}-aaa", t0().timestamp_millis()),
        ]);
    }

    #[tokio::test]
    async fn test_each_digest_keeps_its_own_marker() {
        let env = InMemoryEnvironment::default();
        let digests = ["sha256:aaa", "sha256:bbb", "sha256:ccc"];
        for (i, digest) in digests.iter().enumerate() {
            env.push_image(REPO, digest, &[format!("build-{i}").as_str()])
                .await;
        }

        let quarantine = ImageQuarantine::new(Arc::new(env.clone()), &config(false), GcMetrics::new());
        let mut first = report();
        let isolated = isolated_tags(&env, &digests).await;
        quarantine.process(REPO, &isolated, t0(), &mut first).await;
        assert_eq!(first.tombstoned.len(), 3);

        let mut markers = BTreeSet::new();
        for digest in digests {
            let tags: BTreeSet<String> = env
                .image_tags(REPO, digest)
                .await
                .unwrap()
                .into_iter()
                .collect();
            assert_eq!(
                tombstone::read_image_marker(&tags),
                tombstone::Marker::At(t0()),
                "{digest}"
            );
            markers.extend(tags.into_iter().filter(|t| tombstone::is_image_marker(t)));
        }
        assert_eq!(markers.len(), 3);

        // Past the grace period every tombstoned digest is swept.
        let mut second = report();
        let isolated = isolated_tags(&env, &digests).await;
        quarantine
            .process(REPO, &isolated, t0() + Duration::days(2), &mut second)
            .await;
        assert_eq!(second.deleted.len(), 3);
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_missing_manifest_is_reported() {
        let env = InMemoryEnvironment::default();
        env.push_image(REPO, "sha256:aaa", &["v1"]).await;
        env.push_image(REPO, "sha256:bbb", &["v2"]).await;
        env.fail_manifest("sha256:aaa").await;

        let quarantine = ImageQuarantine::new(Arc::new(env.clone()), &config(false), GcMetrics::new());
        let mut report = report();
        let isolated = isolated_tags(&env, &["sha256:aaa", "sha256:bbb"]).await;
        quarantine.process(REPO, &isolated, t0(), &mut report).await;

        assert_eq!(report.tombstoned, vec!["sha256:bbb".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].artifact, "sha256:aaa");
    }

    #[tokio::test]
    async fn test_deletes_are_batched() {
        let env = InMemoryEnvironment::default();
        let digests = ["sha256:a1", "sha256:a2", "sha256:a3", "sha256:a4", "sha256:a5"];
        for (i, digest) in digests.iter().enumerate() {
            let marker = tombstone::image_marker(t0(), digest);
            env.push_image(REPO, digest, &[format!("old-{i}").as_str(), marker.as_str()])
                .await;
        }
        env.fail_delete("sha256:a4").await;

        let quarantine = ImageQuarantine::new(Arc::new(env.clone()), &config(false), GcMetrics::new());
        let mut report = report();
        let isolated = isolated_tags(&env, &digests).await;
        quarantine
            .process(REPO, &isolated, t0() + Duration::days(2), &mut report)
            .await;

        let batches: Vec<usize> = env
            .mutations()
            .await
            .into_iter()
            .filter_map(|m| match m {
                Mutation::DeleteImages { digests, .. } => Some(digests.len()),
                _ => None,
            })
            .collect();
        assert_eq!(batches, vec![2, 2, 1]);
        assert_eq!(report.deleted.len(), 4);
        assert_eq!(report.failures[0].artifact, "sha256:a4");
        assert!(env.image_tags(REPO, "sha256:a4").await.is_some());
    }

    #[tokio::test]
    async fn test_dry_run_issues_no_writes() {
        let env = InMemoryEnvironment::default();
        let marker = tombstone::image_marker(t0(), "sha256:old");
        env.push_image(REPO, "sha256:new", &["v1"]).await;
        env.push_image(REPO, "sha256:old", &[marker.as_str()]).await;

        let quarantine = ImageQuarantine::new(Arc::new(env.clone()), &config(true), GcMetrics::new());
        let mut report = report();
        let isolated = isolated_tags(&env, &["sha256:new", "sha256:old"]).await;
        quarantine
            .process(REPO, &isolated, t0() + Duration::days(5), &mut report)
            .await;

        assert_eq!(report.tombstoned, vec!["sha256:new".to_string()]);
        assert_eq!(report.deleted, vec!["sha256:old".to_string()]);
        assert!(env.mutations().await.is_empty());
    }
}
