//! Trigram similarity compatible with PostgreSQL's `pg_trgm` extension.
//!
//! Words are runs of alphanumeric characters, lowercased and padded with two
//! leading spaces and one trailing space. Similarity is the Jaccard index of
//! the two trigram sets.

use std::collections::BTreeSet;

/// Default `pg_trgm.similarity_threshold`.
pub const DEFAULT_THRESHOLD: f64 = 0.3;

/// Set of trigrams for `text`, as returned by `show_trgm(text)`.
pub fn trigrams(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = "  "
            .chars()
            .chain(word.to_lowercase().chars())
            .chain(" ".chars())
            .collect();
        for window in padded.windows(3) {
            out.insert(window.iter().collect());
        }
    }
    out
}

/// `similarity(a, b)`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    let union = left.len() + right.len() - shared;
    shared as f64 / union as f64
}
