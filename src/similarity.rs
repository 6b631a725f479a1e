//! Similarity primitives.
//!
//! `fuzzy_similarity` and `relevance_rank` are the in-process implementations.
//! A datastore may offer native equivalents (see `migrations/` for the Postgres
//! functions); whether it does is negotiated once through [`Capabilities`] and
//! the engine falls back to the functions here whenever the native path is
//! absent or fails.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::keywords::tokens;

/// Score for an exact (case-insensitive) match.
pub const EXACT_MATCH: f64 = 1.0;
/// Score when one string contains the other.
pub const CONTAINMENT_MATCH: f64 = 0.8;

/// Bounded [0, 1] closeness of two strings.
///
/// 1.0 for a case-insensitive exact match, 0.8 if either contains the other,
/// otherwise the share of distinct tokens in common relative to the larger
/// token set. Blank input scores 0.0.
pub fn fuzzy_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return EXACT_MATCH;
    }
    if a.contains(&b) || b.contains(&a) {
        return CONTAINMENT_MATCH;
    }

    let ta: BTreeSet<&str> = tokens(&a).collect();
    let tb: BTreeSet<&str> = tokens(&b).collect();
    let larger = ta.len().max(tb.len());
    if larger == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / larger as f64
}

/// Unbounded relevance of `document` for the terms of `query`.
///
/// Sum of case-insensitive occurrences of each distinct query term in the
/// document, divided by the document's token count. Query terms may be
/// separated by whitespace, punctuation or `|`.
pub fn relevance_rank(document: &str, query: &str) -> f64 {
    let document = document.to_lowercase();
    let doc_len = tokens(&document).count();
    if doc_len == 0 {
        return 0.0;
    }

    let query = query.to_lowercase();
    let terms: BTreeSet<&str> = tokens(&query).collect();
    let hits: usize = terms.iter().map(|t| document.matches(t).count()).sum();
    hits as f64 / doc_len as f64
}

/// Native scoring capabilities advertised by a datastore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub native_fuzzy: bool,
    pub native_rank: bool,
}

impl Capabilities {
    pub fn in_process() -> Self {
        Self::default()
    }

    pub fn native() -> Self {
        Self {
            native_fuzzy: true,
            native_rank: true,
        }
    }
}

/// Where a set of primitive scores was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveSource {
    Datastore,
    InProcess,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuzzy_exact_and_case() {
        assert_eq!(fuzzy_similarity("Invoice", "invoice"), 1.0);
        assert_eq!(fuzzy_similarity("  Invoice ", "INVOICE"), 1.0);
    }

    #[test]
    fn test_fuzzy_containment() {
        assert_eq!(fuzzy_similarity("Invoice Template", "invoice"), 0.8);
        assert_eq!(fuzzy_similarity("bill", "invoice,bill"), 0.8);
    }

    #[test]
    fn test_fuzzy_token_overlap() {
        // {design, drawing, final} vs {drawing, final, review, v2}
        let s = fuzzy_similarity("design drawing final", "final-drawing review v2");
        assert!((s - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_fuzzy_disjoint_and_empty() {
        assert_eq!(fuzzy_similarity("Contract", "invoice"), 0.0);
        assert_eq!(fuzzy_similarity("", "invoice"), 0.0);
        assert_eq!(fuzzy_similarity("invoice", "   "), 0.0);
    }

    #[test]
    fn test_fuzzy_is_bounded() {
        for (a, b) in [("a b c", "c b a"), ("x", "y"), ("a a a", "a")] {
            let s = fuzzy_similarity(a, b);
            assert!((0.0..=1.0).contains(&s), "{a} / {b} -> {s}");
        }
    }

    #[test]
    fn test_relevance_counts_terms() {
        let r = relevance_rank("Contract Review Contract", "contract");
        assert!((r - 2.0 / 3.0).abs() < 1e-9);
        let r2 = relevance_rank("Contract Review Contract", "contract | review");
        assert!((r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_relevance_is_monotonic_in_term_frequency() {
        let once = relevance_rank("invoice alpha beta gamma", "invoice");
        let twice = relevance_rank("invoice alpha invoice gamma", "invoice");
        assert!(twice > once);
    }

    #[test]
    fn test_relevance_empty_inputs() {
        assert_eq!(relevance_rank("", "invoice"), 0.0);
        assert_eq!(relevance_rank("invoice", ""), 0.0);
        assert_eq!(relevance_rank("invoice", " | "), 0.0);
    }
}
