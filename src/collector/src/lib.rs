//! Asset garbage collector
//!
//! Reclaims file and image assets that no deployed stack references any
//! more. Artifacts are classified against a corpus of every deployed
//! template, tombstoned when first seen isolated and deleted on a later run
//! once the grace period has passed.
//!
//! Provider access goes through the ports in [`client`]; the in-memory
//! environment implements all of them.

pub mod classifier;
pub mod client;
pub mod clock;
pub mod config;
pub mod corpus;
pub mod error;
pub mod inventory;
pub mod lock;
pub mod metrics;
pub mod orchestrator;
pub mod pagination;
pub mod quarantine;
pub mod report;
pub mod scanner;
pub mod tombstone;

// Re-export commonly used types
pub use classifier::{Liveness, classify_image, classify_object, object_token};
pub use client::{EnvironmentSnapshot, InMemoryEnvironment};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::CollectorConfig;
pub use corpus::ReferenceCorpus;
pub use error::{ClientError, GcError, GcResult};
pub use inventory::InventoryCollector;
pub use lock::{FileRunLock, InProcessRunLock, NoopRunLock, RunGuard, RunLock};
pub use metrics::GcMetrics;
pub use orchestrator::{GarbageCollector, RepositoryDiscovery};
pub use report::{ArtifactFailure, ReclaimReport, StoreReport, StoreTarget};
pub use scanner::{ImageScanner, ImageTags, ObjectScanner};
pub use tombstone::{GracePeriod, ISOLATED_TAG, Marker};
