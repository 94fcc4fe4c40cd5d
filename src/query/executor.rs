//! Query executor for running queries against a snapshot
//!
//! Execution has two phases. A [`Weight`] tree is built once per query from
//! snapshot-wide statistics (idf, average field length). It is then turned
//! into one scorer per segment, whose matches are collected into a bounded
//! top-k heap.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use tracing::debug;

use super::ast::QueryTree;
use super::fuzzy;
use super::scorer::{
    AllScorer, BoxedScorer, EmptyScorer, ExcludeScorer, FieldNorms, IntersectionScorer,
    PhraseScorer, TermScorer, UnionScorer, TERMINATED,
};
use crate::error::{QuarryError, Result};
use crate::index::Snapshot;
use crate::models::ScoredDoc;
use crate::schema::Schema;
use crate::segment::{Bm25Params, DocumentId, SegmentView};

/// Score of documents matched only through negation
const NEGATION_SCORE: f32 = 1.0;

/// A term resolved against the snapshot
#[derive(Clone, Debug)]
pub struct TermWeight {
    pub field: String,
    pub token: String,
    /// idf times boost
    pub weight: f32,
}

/// A phrase resolved against the snapshot
#[derive(Clone, Debug)]
pub struct PhraseWeight {
    pub field: String,
    /// Tokens with their position relative to the first token
    pub tokens: Vec<(String, u32)>,
    /// Summed idf of the tokens times boost
    pub weight: f32,
}

/// Query tree with statistics applied
#[derive(Clone, Debug)]
pub enum Weight {
    Term(TermWeight),
    Phrase(PhraseWeight),
    Union(Vec<Weight>),
    Intersection(Vec<Weight>),
    Exclude {
        include: Box<Weight>,
        exclude: Box<Weight>,
    },
    /// Every document, constant score
    All(f32),
    Empty,
}

impl Weight {
    fn is_empty(&self) -> bool {
        matches!(self, Weight::Empty)
    }

    /// Scorer over one segment
    pub fn scorer<'a>(
        &self,
        segment: &'a SegmentView,
        bm25: &Bm25Params,
        snapshot: &Snapshot,
    ) -> Result<BoxedScorer<'a>> {
        let reader = segment.reader.as_ref();
        let norms = |field: &str| FieldNorms {
            bm25: *bm25,
            lengths: reader.stats().field_lengths(field),
            avg_len: snapshot.stats().avg_field_length(field),
        };

        Ok(match self {
            Weight::Term(term) => match reader.get_posting_meta(&term.field, &term.token) {
                Some(meta) => Box::new(TermScorer::new(
                    reader.postings_for(meta)?,
                    term.weight,
                    norms(&term.field),
                    meta.doc_frequency as u64,
                )?),
                None => Box::new(EmptyScorer),
            },
            Weight::Phrase(phrase) => {
                let mut cursors = Vec::with_capacity(phrase.tokens.len());
                let mut cost = u64::MAX;
                for (token, rel) in &phrase.tokens {
                    let Some(meta) = reader.get_posting_meta(&phrase.field, token) else {
                        return Ok(Box::new(EmptyScorer));
                    };
                    cost = cost.min(meta.doc_frequency as u64);
                    cursors.push((reader.postings_for(meta)?, *rel));
                }
                Box::new(PhraseScorer::new(
                    cursors,
                    phrase.weight,
                    norms(&phrase.field),
                    cost,
                )?)
            }
            Weight::Union(children) => {
                let scorers = children
                    .iter()
                    .map(|c| c.scorer(segment, bm25, snapshot))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(UnionScorer::new(scorers))
            }
            Weight::Intersection(children) => {
                let scorers = children
                    .iter()
                    .map(|c| c.scorer(segment, bm25, snapshot))
                    .collect::<Result<Vec<_>>>()?;
                Box::new(IntersectionScorer::new(scorers)?)
            }
            Weight::Exclude { include, exclude } => Box::new(ExcludeScorer::new(
                include.scorer(segment, bm25, snapshot)?,
                exclude.scorer(segment, bm25, snapshot)?,
            )?),
            Weight::All(score) => Box::new(AllScorer::new(segment.doc_count(), *score)),
            Weight::Empty => Box::new(EmptyScorer),
        })
    }
}

/// Bounded min-heap keeping the `limit` best hits
///
/// Hits are ordered by score descending, ties by document id ascending.
pub struct TopK {
    limit: usize,
    heap: BinaryHeap<Reverse<(OrderedFloat<f32>, Reverse<DocumentId>)>>,
}

impl TopK {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            heap: BinaryHeap::with_capacity(limit.min(1024) + 1),
        }
    }

    pub fn push(&mut self, doc_id: DocumentId, score: f32) {
        if self.limit == 0 {
            return;
        }
        let entry = (OrderedFloat(score), Reverse(doc_id));
        if self.heap.len() < self.limit {
            self.heap.push(Reverse(entry));
        } else if let Some(Reverse(worst)) = self.heap.peek() {
            if entry > *worst {
                self.heap.pop();
                self.heap.push(Reverse(entry));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Hits, best first
    pub fn into_sorted_vec(self) -> Vec<ScoredDoc> {
        // Ascending order of Reverse(entry) is best entry first
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse((score, Reverse(doc_id)))| ScoredDoc {
                doc_id,
                score: score.into_inner(),
            })
            .collect()
    }
}

/// Runs query trees against one snapshot
pub struct QueryExecutor<'a> {
    snapshot: &'a Snapshot,
    schema: &'a Schema,
    bm25: &'a Bm25Params,
    max_fuzzy_expansions: usize,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(
        snapshot: &'a Snapshot,
        schema: &'a Schema,
        bm25: &'a Bm25Params,
        max_fuzzy_expansions: usize,
    ) -> Self {
        Self {
            snapshot,
            schema,
            bm25,
            max_fuzzy_expansions,
        }
    }

    /// Top `limit` live documents for `tree`
    pub fn top_k(&self, tree: &QueryTree, limit: usize) -> Result<Vec<ScoredDoc>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let weight = self.weight(tree)?;
        debug!(query = %tree, ?weight, limit, "Executing query");

        let mut top = TopK::new(limit);
        self.for_each_match(&weight, true, |doc_id, score| top.push(doc_id, score))?;
        Ok(top.into_sorted_vec())
    }

    /// Number of live documents matching `tree`
    pub fn count(&self, tree: &QueryTree) -> Result<u64> {
        let weight = self.weight(tree)?;
        let mut count = 0u64;
        self.for_each_match(&weight, false, |_, _| count += 1)?;
        Ok(count)
    }

    fn for_each_match(
        &self,
        weight: &Weight,
        scoring: bool,
        mut f: impl FnMut(DocumentId, f32),
    ) -> Result<()> {
        if weight.is_empty() {
            return Ok(());
        }
        for segment in self.snapshot.segments() {
            let mut scorer = weight.scorer(segment, self.bm25, self.snapshot)?;
            let mut doc = scorer.doc();
            while doc != TERMINATED {
                if !segment.is_deleted(doc) {
                    let doc_id = segment.reader.get_doc_id(doc).ok_or_else(|| {
                        QuarryError::corrupt(format!("{}: no document id for {:?}", segment.id(), doc))
                    })?;
                    let score = if scoring { scorer.score() } else { 0.0 };
                    f(doc_id, score);
                }
                doc = scorer.advance()?;
            }
        }
        Ok(())
    }

    /// Resolve `tree` against the snapshot's statistics
    pub fn weight(&self, tree: &QueryTree) -> Result<Weight> {
        match tree {
            QueryTree::Term { field, text, boost } => {
                let (_, analyzer) = self.schema.indexed_field(field)?;
                let terms = analyzer
                    .terms(text)
                    .into_iter()
                    .map(|token| self.term_weight(field, token, *boost))
                    .collect();
                Ok(union_of(terms))
            }
            QueryTree::Phrase { field, text, boost } => {
                let (_, analyzer) = self.schema.indexed_field(field)?;
                let tokens: Vec<(String, u32)> =
                    analyzer.analyze(text).map(|t| (t.text, t.position)).collect();
                Ok(self.phrase_weight(field, tokens, *boost))
            }
            QueryTree::Fuzzy {
                field,
                text,
                distance,
                boost,
            } => {
                let (_, analyzer) = self.schema.indexed_field(field)?;
                let term = analyzer.normalize(text);
                let expansions = fuzzy::expand(
                    self.snapshot,
                    field,
                    &term,
                    *distance as u32,
                    self.max_fuzzy_expansions,
                );
                let terms = expansions
                    .into_iter()
                    .map(|e| {
                        let boost = *boost * e.weight();
                        self.term_weight(field, e.term, boost)
                    })
                    .collect();
                Ok(union_of(terms))
            }
            QueryTree::Or(..) => {
                let mut clauses = Vec::new();
                flatten_or(tree, &mut clauses);
                let weights = clauses
                    .into_iter()
                    .map(|c| self.weight(c))
                    .collect::<Result<Vec<_>>>()?;
                Ok(union_of(weights))
            }
            QueryTree::And(..) => {
                let mut clauses = Vec::new();
                flatten_and(tree, &mut clauses);

                let mut required = Vec::new();
                let mut prohibited = Vec::new();
                for clause in clauses {
                    match clause {
                        QueryTree::Not(inner) => prohibited.push(self.weight(inner)?),
                        other => required.push(self.weight(other)?),
                    }
                }

                let include = if required.is_empty() {
                    Weight::All(NEGATION_SCORE)
                } else if required.iter().any(Weight::is_empty) {
                    return Ok(Weight::Empty);
                } else if required.len() == 1 {
                    required.remove(0)
                } else {
                    Weight::Intersection(required)
                };
                Ok(exclude(include, union_of(prohibited)))
            }
            QueryTree::Not(inner) => Ok(exclude(
                Weight::All(NEGATION_SCORE),
                self.weight(inner)?,
            )),
        }
    }

    fn term_weight(&self, field: &str, token: String, boost: f32) -> Weight {
        let df = self.snapshot.doc_frequency(field, &token);
        if df == 0 {
            return Weight::Empty;
        }
        let idf = self.bm25.idf(df, self.snapshot.total_docs());
        Weight::Term(TermWeight {
            field: field.to_string(),
            token,
            weight: idf * boost,
        })
    }

    fn phrase_weight(&self, field: &str, tokens: Vec<(String, u32)>, boost: f32) -> Weight {
        let Some(first) = tokens.first().map(|(_, pos)| *pos) else {
            return Weight::Empty;
        };
        if tokens.len() == 1 {
            let (token, _) = tokens.into_iter().next().unwrap_or_default();
            return self.term_weight(field, token, boost);
        }

        let mut idf_sum = 0.0;
        for (token, _) in &tokens {
            let df = self.snapshot.doc_frequency(field, token);
            if df == 0 {
                return Weight::Empty;
            }
            idf_sum += self.bm25.idf(df, self.snapshot.total_docs());
        }

        Weight::Phrase(PhraseWeight {
            field: field.to_string(),
            tokens: tokens
                .into_iter()
                .map(|(token, pos)| (token, pos - first))
                .collect(),
            weight: idf_sum * boost,
        })
    }
}

fn flatten_or<'t>(tree: &'t QueryTree, out: &mut Vec<&'t QueryTree>) {
    match tree {
        QueryTree::Or(l, r) => {
            flatten_or(l, out);
            flatten_or(r, out);
        }
        other => out.push(other),
    }
}

fn flatten_and<'t>(tree: &'t QueryTree, out: &mut Vec<&'t QueryTree>) {
    match tree {
        QueryTree::And(l, r) => {
            flatten_and(l, out);
            flatten_and(r, out);
        }
        other => out.push(other),
    }
}

/// Union of the non-empty weights
fn union_of(weights: Vec<Weight>) -> Weight {
    let mut weights: Vec<Weight> = weights.into_iter().filter(|w| !w.is_empty()).collect();
    match weights.len() {
        0 => Weight::Empty,
        1 => weights.remove(0),
        _ => Weight::Union(weights),
    }
}

fn exclude(include: Weight, excluded: Weight) -> Weight {
    if include.is_empty() || excluded.is_empty() {
        return include;
    }
    Weight::Exclude {
        include: Box::new(include),
        exclude: Box::new(excluded),
    }
}
