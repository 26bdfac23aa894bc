//! Tombstone markers recording when an artifact was first seen isolated.
//!
//! The marker lives on the artifact itself:
//! - objects carry a tag `awscdk.isolated = <epoch millis>`
//! - images carry an extra image tag `awscdk.isolated-<epoch millis>-<digest
//!   fragment>`, since the registry has no per-image metadata tags. A tag
//!   names a single image within a repository, so the digest fragment keeps
//!   markers written in the same millisecond from moving between images.

use crate::client::Tag;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

pub const ISOLATED_TAG: &str = "awscdk.isolated";

const IMAGE_MARKER_PREFIX: &str = "awscdk.isolated-";

const DIGEST_FRAGMENT_LEN: usize = 12;

/// Tombstone state read from an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Absent,
    At(DateTime<Utc>),
    /// A marker is present but its timestamp cannot be parsed.
    Malformed(String),
}

impl Marker {
    pub fn is_present(&self) -> bool {
        !matches!(self, Marker::Absent)
    }
}

pub fn object_marker(now: DateTime<Utc>) -> Tag {
    Tag::new(ISOLATED_TAG, now.timestamp_millis().to_string())
}

pub fn image_marker(now: DateTime<Utc>, digest: &str) -> String {
    let hex = digest.split_once(':').map_or(digest, |(_, hex)| hex);
    let fragment: String = hex
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(DIGEST_FRAGMENT_LEN)
        .collect();
    if fragment.is_empty() {
        format!("{IMAGE_MARKER_PREFIX}{}", now.timestamp_millis())
    } else {
        format!("{IMAGE_MARKER_PREFIX}{}-{fragment}", now.timestamp_millis())
    }
}

pub fn is_image_marker(tag: &str) -> bool {
    tag.starts_with(IMAGE_MARKER_PREFIX)
}

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

fn resolve<'a>(values: impl Iterator<Item = &'a str>) -> Marker {
    let mut newest: Option<DateTime<Utc>> = None;
    let mut malformed: Option<&str> = None;

    for raw in values {
        match parse_millis(raw) {
            // Several markers only appear after racing runs; the newest one
            // gives the longest wait.
            Some(at) => newest = Some(newest.map_or(at, |n| n.max(at))),
            None => malformed = malformed.or(Some(raw)),
        }
    }

    match (newest, malformed) {
        (Some(at), _) => Marker::At(at),
        (None, Some(raw)) => Marker::Malformed(raw.to_string()),
        (None, None) => Marker::Absent,
    }
}

pub fn read_object_marker(tags: &[Tag]) -> Marker {
    resolve(
        tags.iter()
            .filter(|t| t.key == ISOLATED_TAG)
            .map(|t| t.value.as_str()),
    )
}

pub fn read_image_marker(tags: &BTreeSet<String>) -> Marker {
    resolve(
        tags.iter()
            .filter_map(|t| t.strip_prefix(IMAGE_MARKER_PREFIX))
            .map(|rest| rest.split_once('-').map_or(rest, |(millis, _)| millis)),
    )
}

/// Minimum time an artifact must stay tombstoned before it may be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriod {
    days: u32,
}

impl GracePeriod {
    pub fn days(days: u32) -> Self {
        Self { days }
    }

    pub fn as_days(&self) -> u32 {
        self.days
    }

    pub fn has_elapsed(&self, marked_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(marked_at) >= Duration::days(i64::from(self.days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_object_marker_roundtrip() {
        let tag = object_marker(t0());
        assert_eq!(tag.key, "awscdk.isolated");
        assert_eq!(read_object_marker(&[tag]), Marker::At(t0()));
    }

    #[test]
    fn test_image_marker_format() {
        let marker = image_marker(t0(), "sha256:9f86d081884c7d659a2feaa0c55ad015");
        assert_eq!(
            marker,
            format!("awscdk.isolated-{}-9f86d081884c", t0().timestamp_millis())
        );
        assert!(is_image_marker(&marker));
        assert!(!is_image_marker("awscdk.isolated"));

        let tags = BTreeSet::from(["build-12".to_string(), marker]);
        assert_eq!(read_image_marker(&tags), Marker::At(t0()));
    }

    #[test]
    fn test_image_markers_differ_per_digest() {
        let a = image_marker(t0(), "sha256:aaaaaaaaaaaaaaaa");
        let b = image_marker(t0(), "sha256:bbbbbbbbbbbbbbbb");
        assert_ne!(a, b);
        assert_eq!(read_image_marker(&BTreeSet::from([a])), Marker::At(t0()));
        assert_eq!(read_image_marker(&BTreeSet::from([b])), Marker::At(t0()));
    }

    #[test]
    fn test_bare_image_marker_still_read() {
        let bare = format!("awscdk.isolated-{}", t0().timestamp_millis());
        assert_eq!(read_image_marker(&BTreeSet::from([bare])), Marker::At(t0()));
    }

    #[test]
    fn test_absent_and_malformed_markers() {
        assert_eq!(read_object_marker(&[Tag::new("team", "x")]), Marker::Absent);
        assert_eq!(
            read_object_marker(&[Tag::new(ISOLATED_TAG, "yesterday")]),
            Marker::Malformed("yesterday".to_string())
        );

        let tags = BTreeSet::from(["awscdk.isolated-abc".to_string()]);
        assert!(matches!(read_image_marker(&tags), Marker::Malformed(_)));
    }

    #[test]
    fn test_newest_marker_wins() {
        let later = t0() + Duration::days(2);
        let tags = BTreeSet::from([
            image_marker(t0(), "sha256:aaa"),
            image_marker(later, "sha256:aaa"),
        ]);
        assert_eq!(read_image_marker(&tags), Marker::At(later));
    }

    #[test]
    fn test_grace_period_gate() {
        let grace = GracePeriod::days(7);
        assert!(!grace.has_elapsed(t0(), t0() + Duration::days(6)));
        assert!(grace.has_elapsed(t0(), t0() + Duration::days(7)));
        assert!(grace.has_elapsed(t0(), t0() + Duration::days(8)));
        // Marker from the future (clock skew) never counts as elapsed.
        assert!(!grace.has_elapsed(t0() + Duration::days(1), t0()));
    }

    #[test]
    fn test_zero_day_grace_period() {
        let grace = GracePeriod::days(0);
        assert!(grace.has_elapsed(t0(), t0()));
    }
}
