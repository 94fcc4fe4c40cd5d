//! Edit-distance matching for fuzzy terms
//!
//! Distances are restricted Damerau-Levenshtein (optimal string alignment):
//! insertions, deletions, substitutions and adjacent transpositions each
//! cost one edit.

use tracing::debug;

use crate::index::Snapshot;

/// An indexed term within the allowed distance of a fuzzy query term
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuzzyExpansion {
    pub term: String,
    pub distance: u32,
}

impl FuzzyExpansion {
    /// Score multiplier for this expansion: `1 / (1 + distance)`
    pub fn weight(&self) -> f32 {
        1.0 / (1.0 + self.distance as f32)
    }
}

/// Calculate Damerau-Levenshtein distance (includes transpositions)
pub fn damerau_levenshtein_distance(s1: &str, s2: &str) -> u32 {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    osa_distance(&a, &b, u32::MAX).unwrap_or(u32::MAX)
}

/// Distance between `s1` and `s2` if it is at most `max`
pub fn within_distance(s1: &str, s2: &str, max: u32) -> Option<u32> {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    osa_distance(&a, &b, max)
}

/// Three-row dynamic program with early exit once a row exceeds `max`
fn osa_distance(a: &[char], b: &[char], max: u32) -> Option<u32> {
    let (len1, len2) = (a.len(), b.len());
    if len1.abs_diff(len2) as u64 > max as u64 {
        return None;
    }
    if len1 == 0 || len2 == 0 {
        return Some(len1.max(len2) as u32);
    }

    let mut before_prev: Vec<u32> = vec![0; len2 + 1];
    let mut prev: Vec<u32> = (0..=len2 as u32).collect();
    let mut curr: Vec<u32> = vec![0; len2 + 1];

    for i in 1..=len1 {
        curr[0] = i as u32;
        let mut row_min = curr[0];

        for j in 1..=len2 {
            let cost = u32::from(a[i - 1] != b[j - 1]);
            let mut value = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution

            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                value = value.min(before_prev[j - 2] + 1); // transposition
            }
            curr[j] = value;
            row_min = row_min.min(value);
        }

        if row_min > max {
            return None;
        }
        std::mem::swap(&mut before_prev, &mut prev);
        std::mem::swap(&mut prev, &mut curr);
    }

    let distance = prev[len2];
    (distance <= max).then_some(distance)
}

/// Indexed terms of `field` within `max_distance` of `term`
///
/// Candidates are ranked by (distance, term) and capped at
/// `max_expansions`; the result is returned in term order.
pub fn expand(
    snapshot: &Snapshot,
    field: &str,
    term: &str,
    max_distance: u32,
    max_expansions: usize,
) -> Vec<FuzzyExpansion> {
    let query: Vec<char> = term.chars().collect();

    let mut matches: Vec<FuzzyExpansion> = snapshot
        .field_terms(field)
        .into_iter()
        .filter_map(|candidate| {
            let chars: Vec<char> = candidate.chars().collect();
            osa_distance(&query, &chars, max_distance).map(|distance| FuzzyExpansion {
                term: candidate,
                distance,
            })
        })
        .collect();

    let found = matches.len();
    matches.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.term.cmp(&b.term)));
    matches.truncate(max_expansions);
    matches.sort_by(|a, b| a.term.cmp(&b.term));

    debug!(
        field,
        term,
        max_distance,
        found,
        kept = matches.len(),
        "Expanded fuzzy term"
    );
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distances() {
        assert_eq!(damerau_levenshtein_distance("", ""), 0);
        assert_eq!(damerau_levenshtein_distance("abc", ""), 3);
        assert_eq!(damerau_levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(damerau_levenshtein_distance("quick", "quick"), 0);
        // Transposition is a single edit
        assert_eq!(damerau_levenshtein_distance("quikc", "quick"), 1);
        assert_eq!(damerau_levenshtein_distance("ab", "ba"), 1);
        assert_eq!(damerau_levenshtein_distance("日本語", "日本"), 1);
    }

    #[test]
    fn test_within_distance_bounds() {
        assert_eq!(within_distance("quikc", "quick", 2), Some(1));
        assert_eq!(within_distance("kitten", "sitting", 2), None);
        assert_eq!(within_distance("a", "abcd", 2), None);
        assert_eq!(within_distance("fox", "fox", 0), Some(0));
        assert_eq!(within_distance("fox", "box", 0), None);
    }

    #[test]
    fn test_expansion_weight() {
        let exact = FuzzyExpansion {
            term: "quick".to_string(),
            distance: 0,
        };
        let two = FuzzyExpansion {
            term: "quack".to_string(),
            distance: 2,
        };
        assert_eq!(exact.weight(), 1.0);
        assert!((two.weight() - 1.0 / 3.0).abs() < 1e-6);
    }
}
