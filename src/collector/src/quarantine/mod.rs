//! Two-phase removal of isolated artifacts.
//!
//! An isolated artifact is never deleted on first sight. The tagger first
//! attaches a tombstone marker carrying the current time; the sweeper deletes
//! the artifact on a later run, once the marker is at least the grace period
//! old and the artifact is still isolated. Live artifacts are never touched,
//! even when they still carry a marker from an earlier run.

pub mod images;
pub mod objects;

pub use images::ImageQuarantine;
pub use objects::ObjectQuarantine;

use crate::tombstone::{GracePeriod, Marker};
use chrono::{DateTime, Utc};

/// Next step for an isolated artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Not tombstoned yet: attach a marker.
    Tombstone,
    /// Tombstoned within the grace period.
    Wait { marked_at: DateTime<Utc> },
    /// Tombstoned for at least the grace period.
    Delete { marked_at: DateTime<Utc> },
    /// The marker cannot be read; the artifact is left alone.
    Reject { marker: String },
}

/// Decide the transition of an isolated artifact from its current marker.
pub fn transition(marker: &Marker, grace: GracePeriod, now: DateTime<Utc>) -> Transition {
    match marker {
        Marker::Absent => Transition::Tombstone,
        Marker::At(marked_at) if grace.has_elapsed(*marked_at, now) => Transition::Delete {
            marked_at: *marked_at,
        },
        Marker::At(marked_at) => Transition::Wait {
            marked_at: *marked_at,
        },
        Marker::Malformed(raw) => Transition::Reject {
            marker: raw.clone(),
        },
    }
}
