//! Liveness classification of artifacts against the reference corpus.

use crate::corpus::ReferenceCorpus;
use crate::tombstone;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    /// Referenced by at least one deployed template.
    Live,
    /// No reference anywhere in the corpus.
    Isolated,
}

/// Identifying token of an object: its base name with the final extension
/// removed.
///
/// `assets/4a5b6c.zip` → `4a5b6c`, `bundle.tar.gz` → `bundle.tar`. A base
/// name that starts with its only dot (`.hidden`) keeps the dot.
pub fn object_token(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    }
}

pub fn classify_object(key: &str, corpus: &ReferenceCorpus) -> Liveness {
    if corpus.contains(object_token(key)) {
        Liveness::Live
    } else {
        Liveness::Isolated
    }
}

/// Classify one image digest from the full set of tags attached to it.
///
/// The digest is live if any of its tags is referenced. Tombstone marker
/// tags are never identifying tokens. Returns `None` for an untagged digest,
/// which carries no token to look for and is left alone.
pub fn classify_image(tags: &BTreeSet<String>, corpus: &ReferenceCorpus) -> Option<Liveness> {
    let mut identifying = tags.iter().filter(|t| !tombstone::is_image_marker(t)).peekable();

    if identifying.peek().is_none() {
        return if tags.is_empty() {
            None
        } else {
            // Only markers left: isolated by a previous run.
            Some(Liveness::Isolated)
        };
    }

    if identifying.any(|tag| corpus.contains(tag)) {
        Some(Liveness::Live)
    } else {
        Some(Liveness::Isolated)
    }
}
