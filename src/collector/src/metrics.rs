//! Collection run metrics
//!
//! Thread-safe counters shared by the concurrent repository tasks of a run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Thread-safe metrics for tracking garbage collection runs
#[derive(Debug, Clone)]
pub struct GcMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Number of collection runs completed
    runs: AtomicUsize,
    /// Templates added to reference corpora
    templates_collected: AtomicUsize,
    /// Artifacts scanned across all stores
    artifacts_scanned: AtomicUsize,
    /// Artifacts classified isolated
    artifacts_isolated: AtomicUsize,
    /// Tombstones written
    tombstones_written: AtomicUsize,
    /// Artifacts deleted after the grace period
    artifacts_deleted: AtomicUsize,
    /// Per-artifact and per-store failures
    failures: AtomicUsize,
    /// Total run duration in milliseconds
    total_duration_ms: AtomicU64,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                runs: AtomicUsize::new(0),
                templates_collected: AtomicUsize::new(0),
                artifacts_scanned: AtomicUsize::new(0),
                artifacts_isolated: AtomicUsize::new(0),
                tombstones_written: AtomicUsize::new(0),
                artifacts_deleted: AtomicUsize::new(0),
                failures: AtomicUsize::new(0),
                total_duration_ms: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_run(&self, duration_ms: u64) {
        self.inner.runs.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_duration_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
    }

    pub fn record_templates_collected(&self, count: usize) {
        self.inner
            .templates_collected
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_artifacts_scanned(&self, count: usize) {
        self.inner
            .artifacts_scanned
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_artifacts_isolated(&self, count: usize) {
        self.inner
            .artifacts_isolated
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Record tombstones written. Dry runs write none and never call this.
    pub fn record_tombstones_written(&self, count: usize) {
        self.inner
            .tombstones_written
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_artifacts_deleted(&self, count: usize) {
        self.inner
            .artifacts_deleted
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failures(&self, count: usize) {
        self.inner.failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn runs(&self) -> usize {
        self.inner.runs.load(Ordering::Relaxed)
    }

    pub fn templates_collected(&self) -> usize {
        self.inner.templates_collected.load(Ordering::Relaxed)
    }

    pub fn artifacts_scanned(&self) -> usize {
        self.inner.artifacts_scanned.load(Ordering::Relaxed)
    }

    pub fn artifacts_isolated(&self) -> usize {
        self.inner.artifacts_isolated.load(Ordering::Relaxed)
    }

    pub fn tombstones_written(&self) -> usize {
        self.inner.tombstones_written.load(Ordering::Relaxed)
    }

    pub fn artifacts_deleted(&self) -> usize {
        self.inner.artifacts_deleted.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> usize {
        self.inner.failures.load(Ordering::Relaxed)
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.inner.total_duration_ms.load(Ordering::Relaxed)
    }

    /// Log the accumulated counters
    pub fn log_summary(&self) {
        tracing::info!(
            runs = self.runs(),
            templates = self.templates_collected(),
            scanned = self.artifacts_scanned(),
            isolated = self.artifacts_isolated(),
            tombstones_written = self.tombstones_written(),
            deleted = self.artifacts_deleted(),
            failures = self.failures(),
            total_duration_ms = self.total_duration_ms(),
            "Garbage collection metrics"
        );
    }
}
