//! Cover-density ranking, the in-process twin of `ts_rank_cd(vector, query)`.
//!
//! A cover is a minimal run of matching lexeme occurrences that satisfies the
//! query. Each cover contributes the harmonic mean of its occurrence weights,
//! divided by one plus the number of non-matching positions inside it.

use std::collections::HashMap;

use crate::query::TsQuery;
use crate::vector::{Position, TsVector};

/// Default `{D, C, B, A}` weights used by PostgreSQL.
pub const DEFAULT_WEIGHTS: [f64; 4] = [0.1, 0.2, 0.4, 1.0];

/// Rank `vector` against `query` with normalisation 0.
pub fn rank_cd(vector: &TsVector, query: &TsQuery, weights: &[f64; 4]) -> f64 {
    if !query.matches(vector) {
        return 0.0;
    }
    let wanted = query.positive_lexemes();
    let items: Vec<(&str, Position)> = vector
        .occurrences()
        .into_iter()
        .filter(|(lexeme, _)| wanted.contains(*lexeme))
        .collect();
    if items.is_empty() {
        return 0.0;
    }

    let inverse: Vec<f64> = weights
        .iter()
        .map(|w| if *w > 0.0 { 1.0 / w } else { 0.0 })
        .collect();

    let mut total = 0.0;
    let mut start = 0;
    while let Some((begin, end)) = next_cover(&items, start, query) {
        let inv_sum: f64 = items[begin..=end]
            .iter()
            .map(|(_, p)| inverse[p.weight.rank_index()])
            .sum();
        if inv_sum > 0.0 {
            let span_items = (end - begin) as f64;
            let cpos = (span_items + 1.0) / inv_sum;
            let span_positions = f64::from(items[end].1.pos - items[begin].1.pos);
            let mut noise = span_positions - span_items;
            if noise < 0.0 {
                noise = (span_items / 2.0).floor();
            }
            total += cpos / (1.0 + noise);
        }
        start = begin + 1;
    }
    total
}

/// Find the next cover at or after `start`: extend right until the window
/// satisfies the query, then shrink from the left.
fn next_cover(items: &[(&str, Position)], start: usize, query: &TsQuery) -> Option<(usize, usize)> {
    if start >= items.len() {
        return None;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut end = None;
    for (idx, (lexeme, _)) in items.iter().enumerate().skip(start) {
        *counts.entry(*lexeme).or_default() += 1;
        if query.satisfied_by(&|l| counts.get(l).copied().unwrap_or(0) > 0) {
            end = Some(idx);
            break;
        }
    }
    let end = end?;

    let mut window: HashMap<&str, usize> = HashMap::new();
    for idx in (start..=end).rev() {
        *window.entry(items[idx].0).or_default() += 1;
        if query.satisfied_by(&|l| window.get(l).copied().unwrap_or(0) > 0) {
            return Some((idx, end));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Weight;

    fn rank(doc: &TsVector, q: &str) -> f64 {
        rank_cd(doc, &TsQuery::parse(q).unwrap(), &DEFAULT_WEIGHTS)
    }

    #[test]
    fn adjacent_terms_at_weight_a_rank_one() {
        let doc = TsVector::weighted([("asthma attack", Weight::A)]);
        assert!((rank(&doc, "asthma attack") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn noise_between_terms_halves_rank() {
        let doc = TsVector::weighted([("Diabetes Mellitus Type 2", Weight::A)]);
        assert!((rank(&doc, "type 2 diabetes") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn weight_b_ranks_below_weight_a() {
        let a = TsVector::weighted([("type 2 diabetes", Weight::A)]);
        let b = TsVector::weighted([("type 2 diabetes", Weight::B)]);
        let q = "type 2 diabetes";
        assert!((rank(&b, q) - 0.4).abs() < 1e-9);
        assert!(rank(&a, q) > rank(&b, q));
    }

    #[test]
    fn non_matching_document_ranks_zero() {
        let doc = TsVector::from_text("asthma");
        assert_eq!(rank(&doc, "copd"), 0.0);
    }

    #[test]
    fn repeated_covers_accumulate() {
        let once = TsVector::from_text("asthma");
        let twice = TsVector::from_text("asthma and more asthma");
        assert!(rank(&twice, "asthma") > rank(&once, "asthma"));
    }
}
