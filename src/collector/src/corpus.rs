//! The reference corpus: every deployed template body from one run.

use std::collections::HashSet;

/// Immutable aggregate of all template bodies retrieved in one run.
///
/// Lookups use plain substring containment against the concatenated bodies,
/// so a token that merely happens to occur inside some unrelated string still
/// counts as referenced. That bias only ever keeps artifacts alive.
///
/// Bodies are concatenated without a separator; a match spanning the end of
/// one template and the start of the next also counts.
///
/// Every maximal run of identifier characters (`[A-Za-z0-9_-]`) is indexed
/// once at build time, both as a set and as one newline-joined text holding
/// each distinct run once. A token equal to an indexed run is a set hit. A
/// token made only of identifier characters can only occur inside a single
/// run, so a miss on the set is settled by scanning the distinct runs rather
/// than the whole corpus. Any other token falls back to a scan of the
/// concatenated bodies. The result is always identical to a full scan.
///
/// Asset hashes and image tags are identifier-shaped, so the per-token cost
/// of a miss is linear in the size of the distinct identifiers. Templates
/// repeat most of their identifiers (resource types, property names), which
/// keeps that well below the corpus size.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCorpus {
    text: String,
    identifiers: HashSet<String>,
    identifier_text: String,
    template_count: usize,
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

impl ReferenceCorpus {
    pub fn from_templates<I, S>(templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut text = String::new();
        let mut template_count = 0;
        for template in templates {
            text.push_str(template.as_ref());
            template_count += 1;
        }

        let mut identifiers = HashSet::new();
        let mut identifier_text = String::new();
        for run in text
            .split(|c: char| !c.is_ascii() || !is_identifier_byte(c as u8))
            .filter(|run| !run.is_empty())
        {
            if identifiers.insert(run.to_owned()) {
                identifier_text.push_str(run);
                identifier_text.push('\n');
            }
        }

        Self {
            text,
            identifiers,
            identifier_text,
            template_count,
        }
    }

    /// Whether `token` occurs anywhere in the corpus.
    pub fn contains(&self, token: &str) -> bool {
        if self.identifiers.contains(token) {
            return true;
        }
        let haystack = if !token.is_empty() && token.bytes().all(is_identifier_byte) {
            &self.identifier_text
        } else {
            &self.text
        };
        memchr::memmem::find(haystack.as_bytes(), token.as_bytes()).is_some()
    }

    pub fn template_count(&self) -> usize {
        self.template_count
    }

    /// Size of the concatenated template bodies in bytes.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_identifier_hit() {
        let corpus = ReferenceCorpus::from_templates([
            r#"{"S3Key":"MyBucketKey123abc.zip"}"#,
            r#"{"Image":"123.dkr.ecr.us-east-1.amazonaws.com/repo:build-17"}"#,
        ]);
        assert_eq!(corpus.template_count(), 2);
        assert!(corpus.contains("MyBucketKey123abc"));
        assert!(corpus.contains("build-17"));
        assert!(!corpus.contains("OldKeyDead456def"));
    }

    #[test]
    fn test_substring_semantics_preserved() {
        let corpus = ReferenceCorpus::from_templates(["prefix-abcdef123456-suffix"]);
        // Not an identifier run on its own, still a substring.
        assert!(corpus.contains("abcdef123456"));
        assert!(corpus.contains("def12"));
        assert!(corpus.contains("x-abc"));
    }

    #[test]
    fn test_match_spanning_templates() {
        let corpus = ReferenceCorpus::from_templates(["...abc", "def..."]);
        assert!(corpus.contains("abcdef"));
    }

    #[test]
    fn test_empty_token_is_always_contained() {
        let corpus = ReferenceCorpus::from_templates(Vec::<String>::new());
        assert!(corpus.is_empty());
        assert!(corpus.contains(""));
        assert!(!corpus.contains("a"));
    }

    #[test]
    fn test_non_ascii_templates() {
        let corpus = ReferenceCorpus::from_templates(["Beschreibung: größe=asset9f8e"]);
        assert!(corpus.contains("asset9f8e"));
        assert!(corpus.contains("größe"));
    }

    #[test]
    fn test_identifier_misses_scan_distinct_runs() {
        let corpus = ReferenceCorpus::from_templates([
            r#"{"Type":"AWS::Lambda::Function","Type":"AWS::Lambda::Function"}"#,
        ]);
        assert_eq!(corpus.identifier_text, "Type\nAWS\nLambda\nFunction\n");

        // Inside one run.
        assert!(corpus.contains("ambd"));
        // Never across the boundary of two runs.
        assert!(!corpus.contains("TypeAWS"));
        assert!(!corpus.contains("Type\nAWS"));
        // Non-identifier tokens still see the raw bodies.
        assert!(corpus.contains("AWS::Lambda"));
    }
}
