//! Run orchestration.
//!
//! ## Phases
//!
//! 1. **Validate and lock**: reject invalid configuration, then take the run
//!    lock for the environment scope
//! 2. **Build corpus**: collect every deployed template once; failure aborts
//!    the run before any artifact is classified
//! 3. **Objects**: scan the asset bucket, classify each key, tombstone or
//!    sweep the isolated ones
//! 4. **Images**: discover managed repositories by their convention tag and
//!    process each one independently, a bounded number at a time
//!
//! Failures scoped to a bucket, repository or artifact are recorded in the
//! [`ReclaimReport`] and never stop sibling work.

use crate::classifier::{Liveness, classify_image, classify_object};
use crate::client::{
    ImageRegistryClient, InMemoryEnvironment, ObjectStoreClient, StackInventory,
};
use crate::clock::{Clock, SystemClock};
use crate::config::CollectorConfig;
use crate::corpus::ReferenceCorpus;
use crate::error::{ClientError, GcResult};
use crate::inventory::InventoryCollector;
use crate::lock::{NoopRunLock, RunLock};
use crate::metrics::GcMetrics;
use crate::pagination::collect_pages;
use crate::quarantine::{ImageQuarantine, ObjectQuarantine};
use crate::report::{ReclaimReport, StoreReport, StoreTarget};
use crate::scanner::{ImageScanner, ImageTags, ObjectScanner};
use crate::tombstone;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Outcome of managed repository discovery.
#[derive(Debug, Default)]
pub struct RepositoryDiscovery {
    /// Names of repositories carrying the convention tag.
    pub managed: Vec<String>,
    /// Repositories whose tags could not be read.
    pub unreadable: Vec<(String, ClientError)>,
}

pub struct GarbageCollector {
    stacks: Arc<dyn StackInventory>,
    objects: Arc<dyn ObjectStoreClient>,
    registry: Arc<dyn ImageRegistryClient>,
    clock: Arc<dyn Clock>,
    lock: Arc<dyn RunLock>,
    metrics: GcMetrics,
    config: CollectorConfig,
}

impl GarbageCollector {
    pub fn new(
        stacks: Arc<dyn StackInventory>,
        objects: Arc<dyn ObjectStoreClient>,
        registry: Arc<dyn ImageRegistryClient>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            stacks,
            objects,
            registry,
            clock: Arc::new(SystemClock),
            lock: Arc::new(NoopRunLock),
            metrics: GcMetrics::new(),
            config,
        }
    }

    /// Collector whose three ports are all served by one in-memory
    /// environment.
    pub fn in_memory(env: &InMemoryEnvironment, config: CollectorConfig) -> Self {
        Self::new(
            Arc::new(env.clone()),
            Arc::new(env.clone()),
            Arc::new(env.clone()),
            config,
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lock(mut self, lock: Arc<dyn RunLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Share metrics with other collectors or with the caller.
    pub fn with_metrics(mut self, metrics: GcMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &GcMetrics {
        &self.metrics
    }

    /// Execute one collection run.
    ///
    /// # Errors
    ///
    /// Fails without classifying or mutating anything when the configuration
    /// is invalid, the run lock is held, or the reference corpus cannot be
    /// built completely. Every other failure ends up in the report.
    pub async fn run(&self) -> GcResult<ReclaimReport> {
        self.config.validate()?;
        let _guard = self.lock.acquire(&self.config.scope)?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let now = self.clock.now();

        tracing::info!(
            run_id = %run_id,
            scope = %self.config.scope,
            store_kind = %self.config.store_kind,
            dry_run = self.config.dry_run,
            in_isolation_for_days = self.config.in_isolation_for_days,
            "Starting garbage collection"
        );

        let corpus = match InventoryCollector::new(Arc::clone(&self.stacks))
            .collect()
            .await
        {
            Ok(corpus) => Arc::new(corpus),
            Err(e) => {
                tracing::error!(
                    run_id = %run_id,
                    error = %e,
                    "Reference corpus incomplete, aborting without changes"
                );
                return Err(e);
            }
        };
        self.metrics
            .record_templates_collected(corpus.template_count());

        let mut stores = Vec::new();

        if self.config.store_kind.includes_objects() {
            if let Some(bucket) = self.config.bucket.as_deref() {
                stores.push(self.collect_objects(bucket, &corpus, now).await);
            }
        }

        if self.config.store_kind.includes_images() {
            stores.extend(self.collect_images(&corpus, now).await);
        }

        for store in &stores {
            self.metrics.record_artifacts_scanned(store.scanned);
            self.metrics.record_artifacts_isolated(store.isolated.len());
            self.metrics
                .record_failures(store.failures.len() + usize::from(store.error.is_some()));
        }

        let elapsed = started.elapsed();
        self.metrics
            .record_run(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));

        let report = ReclaimReport {
            run_id,
            scope: self.config.scope.clone(),
            store_kind: self.config.store_kind,
            dry_run: self.config.dry_run,
            in_isolation_for_days: self.config.in_isolation_for_days,
            started_at: now,
            elapsed,
            stacks: corpus.template_count(),
            stores,
        };
        report.log();

        Ok(report)
    }

    async fn collect_objects(
        &self,
        bucket: &str,
        corpus: &ReferenceCorpus,
        now: DateTime<Utc>,
    ) -> StoreReport {
        let target = StoreTarget::Bucket(bucket.to_string());

        let keys = match ObjectScanner::new(Arc::clone(&self.objects))
            .scan(bucket)
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(bucket = %bucket, error = %e, "Failed to scan bucket");
                return StoreReport::failed(target, e);
            }
        };

        let mut report = StoreReport::new(target);
        report.scanned = keys.len();
        report.isolated = keys
            .into_iter()
            .filter(|key| classify_object(key, corpus) == Liveness::Isolated)
            .collect();
        report.live = report.scanned - report.isolated.len();

        tracing::info!(
            bucket = %bucket,
            scanned = report.scanned,
            isolated = report.isolated.len(),
            "Classified objects"
        );

        let isolated = report.isolated.clone();
        ObjectQuarantine::new(Arc::clone(&self.objects), &self.config, self.metrics.clone())
            .process(bucket, &isolated, now, &mut report)
            .await;

        report
    }

    async fn collect_images(
        &self,
        corpus: &Arc<ReferenceCorpus>,
        now: DateTime<Utc>,
    ) -> Vec<StoreReport> {
        let discovery = match self.discover_repositories().await {
            Ok(discovery) => discovery,
            Err(e) => {
                tracing::error!(error = %e, "Failed to discover managed repositories");
                return vec![StoreReport::failed(StoreTarget::Registry, e)];
            }
        };

        tracing::info!(
            repositories = discovery.managed.len(),
            concurrency = self.config.repository_concurrency,
            "Collecting managed repositories"
        );

        let mut reports: Vec<StoreReport> = discovery
            .unreadable
            .into_iter()
            .map(|(name, e)| StoreReport::failed(StoreTarget::Repository(name), e))
            .collect();

        let collected: Vec<StoreReport> = stream::iter(discovery.managed)
            .map(|repository| {
                let corpus = Arc::clone(corpus);
                async move { self.collect_repository(&repository, &corpus, now).await }
            })
            .buffered(self.config.repository_concurrency)
            .collect()
            .await;
        reports.extend(collected);

        reports
    }

    /// Find every repository carrying the managed repository tag.
    ///
    /// A failed repository listing fails discovery as a whole; a repository
    /// whose tags cannot be read is reported on its own.
    pub async fn discover_repositories(&self) -> Result<RepositoryDiscovery, ClientError> {
        let repositories = collect_pages("DescribeRepositories", |token| {
            self.registry.list_repositories(token)
        })
        .await?;

        let mut discovery = RepositoryDiscovery::default();
        for repository in repositories {
            match self.registry.get_repository_tags(&repository.arn).await {
                Ok(tags) if tags.contains(&self.config.managed_repository_tag) => {
                    discovery.managed.push(repository.name);
                }
                Ok(_) => {
                    tracing::trace!(repository = %repository.name, "Skipping unmanaged repository");
                }
                Err(e) => {
                    tracing::warn!(
                        repository = %repository.name,
                        error = %e,
                        "Failed to read repository tags"
                    );
                    discovery.unreadable.push((repository.name, e));
                }
            }
        }

        Ok(discovery)
    }

    async fn collect_repository(
        &self,
        repository: &str,
        corpus: &ReferenceCorpus,
        now: DateTime<Utc>,
    ) -> StoreReport {
        let target = StoreTarget::Repository(repository.to_string());

        let images = match ImageScanner::new(Arc::clone(&self.registry))
            .scan(repository)
            .await
        {
            Ok(images) => images,
            Err(e) => {
                tracing::error!(repository = %repository, error = %e, "Failed to scan repository");
                return StoreReport::failed(target, e);
            }
        };

        let mut report = StoreReport::new(target);
        report.scanned = images.len();

        let mut isolated = ImageTags::new();
        for (digest, tags) in images {
            match classify_image(&tags, corpus) {
                None => report.skipped.push(digest),
                Some(Liveness::Live) => {
                    report.live += 1;
                    if tombstone::read_image_marker(&tags).is_present() {
                        report.live_tombstoned += 1;
                    }
                }
                Some(Liveness::Isolated) => {
                    report.isolated.push(digest.clone());
                    isolated.insert(digest, tags);
                }
            }
        }

        tracing::info!(
            repository = %repository,
            scanned = report.scanned,
            isolated = report.isolated.len(),
            untagged = report.skipped.len(),
            "Classified images"
        );

        ImageQuarantine::new(Arc::clone(&self.registry), &self.config, self.metrics.clone())
            .process(repository, &isolated, now, &mut report)
            .await;

        report
    }
}
