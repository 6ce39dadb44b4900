//! Character-trigram similarity for fuzzy nomenclature matching.
//!
//! Tolerant to typos and word-order variance: two strings are compared by
//! the overlap of their 3-character windows (Jaccard over trigram sets),
//! with words padded the way pg_trgm does it.

use std::collections::HashSet;

/// Extract the padded trigram set of a string.
///
/// Text is lowercased, non-alphanumeric runs split words, and each word is
/// padded with two leading and one trailing space before windowing.
pub fn trigrams(text: &str) -> HashSet<String> {
    let mut set = HashSet::new();
    let lowered = text.to_lowercase();

    for word in lowered.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let padded: Vec<char> = format!("  {} ", word).chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }

    set
}

/// Jaccard similarity of two trigram sets, in `[0, 1]`.
///
/// Returns `0.0` when either side has no trigrams.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let shared = ta.intersection(&tb).count();
    let total = ta.union(&tb).count();
    shared as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_are_one() {
        let sim = trigram_similarity("stainless steel bolt", "stainless steel bolt");
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn case_insensitive() {
        let sim = trigram_similarity("Copper Wire", "copper wire");
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_strings_are_zero() {
        assert_eq!(trigram_similarity("xyz", "qqq"), 0.0);
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(trigram_similarity("", "bolt"), 0.0);
        assert_eq!(trigram_similarity("bolt", ""), 0.0);
        assert_eq!(trigram_similarity("", ""), 0.0);
    }

    #[test]
    fn typo_stays_above_fuzzy_threshold() {
        let sim = trigram_similarity("stainless steel bolts", "stainles steel bolts");
        assert!(sim > 0.4, "typo similarity too low: {sim}");
    }

    #[test]
    fn word_order_invariant() {
        let a = trigram_similarity("steel stainless", "stainless steel");
        assert!((a - 1.0).abs() < 1e-9);
    }

    #[test]
    fn similarity_in_unit_range() {
        let sim = trigram_similarity("polypropylene granules", "polyethylene pellets");
        assert!((0.0..=1.0).contains(&sim));
    }
}
