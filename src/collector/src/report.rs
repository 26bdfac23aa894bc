//! Reclaim report emitted by every collection run, dry or not.

use chrono::{DateTime, Utc};
use common::StoreKind;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Store a [`StoreReport`] covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum StoreTarget {
    Bucket(String),
    Repository(String),
    /// The registry itself, used when repository discovery fails.
    Registry,
}

impl fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreTarget::Bucket(name) => write!(f, "bucket {name}"),
            StoreTarget::Repository(name) => write!(f, "repository {name}"),
            StoreTarget::Registry => write!(f, "registry"),
        }
    }
}

/// A per-artifact failure that was recorded and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactFailure {
    pub artifact: String,
    pub error: String,
}

/// Outcome for one bucket or repository.
///
/// In dry-run mode `tombstoned` and `deleted` hold what *would* have been
/// tombstoned or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreReport {
    pub target: StoreTarget,
    /// Artifacts seen by the scanner.
    pub scanned: usize,
    /// Artifacts referenced by the corpus.
    pub live: usize,
    /// Live artifacts still carrying a tombstone from an earlier run. Object
    /// tags are only read for isolated objects, so this counts images only.
    pub live_tombstoned: usize,
    /// Artifacts that could not be classified (untagged image digests).
    pub skipped: Vec<String>,
    /// Every artifact classified isolated in this run.
    pub isolated: Vec<String>,
    /// Isolated artifacts tombstoned in this run.
    pub tombstoned: Vec<String>,
    /// Tombstoned artifacts still inside the grace period.
    pub pending: Vec<String>,
    /// Artifacts deleted after the grace period.
    pub deleted: Vec<String>,
    pub failures: Vec<ArtifactFailure>,
    /// Store-level failure (listing or discovery). Nothing was classified.
    pub error: Option<String>,
}

impl StoreReport {
    pub fn new(target: StoreTarget) -> Self {
        Self {
            target,
            scanned: 0,
            live: 0,
            live_tombstoned: 0,
            skipped: Vec::new(),
            isolated: Vec::new(),
            tombstoned: Vec::new(),
            pending: Vec::new(),
            deleted: Vec::new(),
            failures: Vec::new(),
            error: None,
        }
    }

    pub fn failed(target: StoreTarget, error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(target)
        }
    }

    pub fn record_failure(&mut self, artifact: impl Into<String>, error: impl fmt::Display) {
        self.failures.push(ArtifactFailure {
            artifact: artifact.into(),
            error: error.to_string(),
        });
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReclaimReport {
    pub run_id: Uuid,
    pub scope: String,
    pub store_kind: StoreKind,
    pub dry_run: bool,
    pub in_isolation_for_days: u32,
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Templates in the reference corpus.
    pub stacks: usize,
    pub stores: Vec<StoreReport>,
}

impl ReclaimReport {
    pub fn isolated_count(&self) -> usize {
        self.stores.iter().map(|s| s.isolated.len()).sum()
    }

    pub fn tombstoned_count(&self) -> usize {
        self.stores.iter().map(|s| s.tombstoned.len()).sum()
    }

    pub fn pending_count(&self) -> usize {
        self.stores.iter().map(|s| s.pending.len()).sum()
    }

    pub fn deleted_count(&self) -> usize {
        self.stores.iter().map(|s| s.deleted.len()).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.stores
            .iter()
            .map(|s| s.failures.len() + usize::from(s.error.is_some()))
            .sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }

    /// Store report for the given target, if it was processed.
    pub fn store(&self, target: &StoreTarget) -> Option<&StoreReport> {
        self.stores.iter().find(|s| &s.target == target)
    }

    /// Log a summary of the run.
    pub fn log(&self) {
        for store in &self.stores {
            match &store.error {
                Some(error) => tracing::error!(
                    run_id = %self.run_id,
                    target = %store.target,
                    error = %error,
                    "Store could not be collected"
                ),
                None => tracing::info!(
                    run_id = %self.run_id,
                    target = %store.target,
                    scanned = store.scanned,
                    live = store.live,
                    isolated = store.isolated.len(),
                    tombstoned = store.tombstoned.len(),
                    pending = store.pending.len(),
                    deleted = store.deleted.len(),
                    failures = store.failures.len(),
                    dry_run = self.dry_run,
                    "Store collected"
                ),
            }
        }

        tracing::info!(
            run_id = %self.run_id,
            scope = %self.scope,
            store_kind = %self.store_kind,
            stacks = self.stacks,
            isolated = self.isolated_count(),
            tombstoned = self.tombstoned_count(),
            pending = self.pending_count(),
            deleted = self.deleted_count(),
            failures = self.failure_count(),
            elapsed = %humantime::format_duration(self.elapsed),
            dry_run = self.dry_run,
            "Garbage collection complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(stores: Vec<StoreReport>) -> ReclaimReport {
        ReclaimReport {
            run_id: Uuid::new_v4(),
            scope: "123/us-east-1".to_string(),
            store_kind: StoreKind::Both,
            dry_run: false,
            in_isolation_for_days: 7,
            started_at: Utc::now(),
            elapsed: Duration::from_millis(1500),
            stacks: 2,
            stores,
        }
    }

    #[test]
    fn test_counts_aggregate_over_stores() {
        let mut bucket = StoreReport::new(StoreTarget::Bucket("assets".to_string()));
        bucket.isolated = vec!["a.zip".to_string(), "b.zip".to_string()];
        bucket.tombstoned = vec!["a.zip".to_string()];
        bucket.deleted = vec!["b.zip".to_string()];

        let mut repo = StoreReport::new(StoreTarget::Repository("images".to_string()));
        repo.isolated = vec!["sha256:bbb".to_string()];
        repo.record_failure("sha256:bbb", "manifest missing");

        let registry = StoreReport::failed(StoreTarget::Registry, "throttled");

        let report = report(vec![bucket, repo, registry]);
        assert_eq!(report.isolated_count(), 3);
        assert_eq!(report.tombstoned_count(), 1);
        assert_eq!(report.deleted_count(), 1);
        assert_eq!(report.failure_count(), 2);
        assert!(report.has_failures());
        assert!(
            report
                .store(&StoreTarget::Bucket("assets".to_string()))
                .unwrap()
                .is_ok()
        );
    }

    #[test]
    fn test_report_serializes() {
        let report = report(vec![StoreReport::new(StoreTarget::Bucket(
            "assets".to_string(),
        ))]);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["store_kind"], "both");
        assert_eq!(json["elapsed"], "1s 500ms");
        assert_eq!(json["stores"][0]["target"]["kind"], "bucket");
        assert_eq!(json["stores"][0]["target"]["name"], "assets");
    }
}
