//! Best-fragment highlighting
//!
//! Stored text is re-tokenized with the field's analyzer. Every window of
//! `fragment_size` consecutive tokens is scored by the summed weight of the
//! query terms it contains; the best window (earliest on ties) is returned
//! with matching tokens wrapped in the configured tags.

use std::collections::HashMap;
use std::sync::Arc;

use crate::analysis::{Analyzer, Token};
use crate::query::fuzzy::within_distance;
use crate::query::QueryTree;

pub const DEFAULT_PRE_TAG: &str = "<b>";
pub const DEFAULT_POST_TAG: &str = "</b>";

/// Positive query terms of one field, with weights
#[derive(Clone, Debug, Default)]
pub struct HighlightQuery {
    terms: HashMap<String, f32>,
    /// (normalized term, max distance, boost)
    fuzzy: Vec<(String, u32, f32)>,
}

impl HighlightQuery {
    /// Collect the terms of `tree` that target `field`; clauses under NOT
    /// are ignored
    pub fn from_tree(tree: &QueryTree, field: &str, analyzer: &Analyzer) -> Self {
        let mut query = Self::default();
        query.collect(tree, field, analyzer);
        query
    }

    fn collect(&mut self, tree: &QueryTree, field: &str, analyzer: &Analyzer) {
        match tree {
            QueryTree::And(l, r) | QueryTree::Or(l, r) => {
                self.collect(l, field, analyzer);
                self.collect(r, field, analyzer);
            }
            QueryTree::Not(_) => {}
            QueryTree::Term { field: f, text, boost }
            | QueryTree::Phrase { field: f, text, boost } => {
                if f == field {
                    for token in analyzer.terms(text) {
                        self.add_term(token, *boost);
                    }
                }
            }
            QueryTree::Fuzzy {
                field: f,
                text,
                distance,
                boost,
            } => {
                if f == field {
                    self.fuzzy
                        .push((analyzer.normalize(text), *distance as u32, *boost));
                }
            }
        }
    }

    /// Add an exact term; a repeated term keeps its highest weight
    pub fn add_term(&mut self, token: impl Into<String>, weight: f32) {
        let entry = self.terms.entry(token.into()).or_insert(0.0);
        *entry = entry.max(weight);
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.fuzzy.is_empty()
    }

    /// Weight of an analyzed token; 0 when it matches nothing
    pub fn weight(&self, token: &str) -> f32 {
        let mut best = self.terms.get(token).copied().unwrap_or(0.0);
        for (pattern, max_distance, boost) in &self.fuzzy {
            if let Some(distance) = within_distance(pattern, token, *max_distance) {
                best = best.max(boost / (1.0 + distance as f32));
            }
        }
        best
    }
}

/// Produces the best highlighted fragment of a text
#[derive(Clone, Debug)]
pub struct Highlighter {
    analyzer: Arc<Analyzer>,
    pre_tag: String,
    post_tag: String,
}

impl Highlighter {
    pub fn new(analyzer: Arc<Analyzer>) -> Self {
        Self {
            analyzer,
            pre_tag: DEFAULT_PRE_TAG.to_string(),
            post_tag: DEFAULT_POST_TAG.to_string(),
        }
    }

    pub fn with_tags(mut self, pre_tag: impl Into<String>, post_tag: impl Into<String>) -> Self {
        self.pre_tag = pre_tag.into();
        self.post_tag = post_tag.into();
        self
    }

    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.analyzer
    }

    /// Best window of `fragment_size` tokens with matches wrapped in tags
    ///
    /// Without any match the first window is returned unmarked.
    pub fn best_fragment(&self, text: &str, query: &HighlightQuery, fragment_size: usize) -> String {
        let tokens: Vec<Token> = self.analyzer.analyze(text).collect();
        if tokens.is_empty() {
            return String::new();
        }

        let weights: Vec<f32> = tokens.iter().map(|t| query.weight(&t.text)).collect();
        let (start, end) = best_window(&weights, fragment_size.max(1));
        self.render(text, &tokens[start..end], &weights[start..end])
    }

    fn render(&self, text: &str, tokens: &[Token], weights: &[f32]) -> String {
        let (Some(first), Some(last)) = (tokens.first(), tokens.last()) else {
            return String::new();
        };

        let mut out = String::with_capacity(last.offset_to - first.offset_from + 32);
        let mut cursor = first.offset_from;
        for (token, &weight) in tokens.iter().zip(weights) {
            // Overlapping or out-of-order spans are copied through unmarked
            if token.offset_from < cursor {
                continue;
            }
            out.push_str(&text[cursor..token.offset_from]);
            let word = &text[token.offset_from..token.offset_to];
            if weight > 0.0 {
                out.push_str(&self.pre_tag);
                out.push_str(word);
                out.push_str(&self.post_tag);
            } else {
                out.push_str(word);
            }
            cursor = token.offset_to;
        }
        if cursor < last.offset_to {
            out.push_str(&text[cursor..last.offset_to]);
        }
        out
    }
}

/// Token range of the highest-weight window; earliest wins ties
fn best_window(weights: &[f32], size: usize) -> (usize, usize) {
    let size = size.min(weights.len());
    let mut sum: f32 = weights[..size].iter().sum();
    let (mut best_start, mut best_sum) = (0, sum);

    for start in 1..=weights.len() - size {
        sum += weights[start + size - 1] - weights[start - 1];
        if sum > best_sum + f32::EPSILON {
            best_sum = sum;
            best_start = start;
        }
    }
    (best_start, best_start + size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;

    fn highlighter() -> Highlighter {
        Highlighter::new(Arc::new(Analyzer::standard()))
    }

    fn query(q: &str) -> HighlightQuery {
        HighlightQuery::from_tree(&parse(q, "body").unwrap(), "body", &Analyzer::standard())
    }

    #[test]
    fn test_best_window_is_chosen() {
        let text = "alpha beta gamma delta quick fox jumps epsilon zeta";
        let fragment = highlighter().best_fragment(text, &query("quick OR fox"), 3);
        assert_eq!(fragment, "delta <b>quick</b> <b>fox</b>");
    }

    #[test]
    fn test_ties_pick_earliest_window() {
        let text = "fox one two three four fox";
        let fragment = highlighter().best_fragment(text, &query("fox"), 2);
        assert_eq!(fragment, "<b>fox</b> one");
    }

    #[test]
    fn test_no_match_returns_first_window_unmarked() {
        let fragment = highlighter().best_fragment("one two three four", &query("zebra"), 2);
        assert_eq!(fragment, "one two");
        assert_eq!(highlighter().best_fragment("", &query("zebra"), 2), "");
    }

    #[test]
    fn test_original_case_and_punctuation_preserved() {
        let fragment = highlighter()
            .with_tags("<b><font color='red'>", "</font></b>")
            .best_fragment("The Quick, brown fox.", &query("quick"), 10);
        assert_eq!(
            fragment,
            "The <b><font color='red'>Quick</font></b>, brown fox"
        );
    }

    #[test]
    fn test_negated_and_other_field_terms_ignored() {
        let q = query("fox AND NOT brown AND title:quick");
        assert!(q.weight("fox") > 0.0);
        assert_eq!(q.weight("brown"), 0.0);
        assert_eq!(q.weight("quick"), 0.0);
    }

    #[test]
    fn test_fuzzy_and_boost_weights() {
        let q = query("quikc~1 fox^3");
        assert!((q.weight("quick") - 0.5).abs() < 1e-6);
        assert_eq!(q.weight("fox"), 3.0);
        assert_eq!(q.weight("quack"), 0.0);

        let fragment = highlighter().best_fragment("a quick fox", &q, 5);
        assert_eq!(fragment, "a <b>quick</b> <b>fox</b>");
    }
}
