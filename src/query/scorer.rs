//! Per-segment document cursors
//!
//! A scorer walks the matching docnos of one segment in increasing order.
//! A new scorer is already positioned on its first match; `doc()` returns
//! [`TERMINATED`] once it is exhausted.

use crate::error::Result;
use crate::segment::{Bm25Params, DocNo, FieldLengths, PostingIterator};

/// Docno of an exhausted scorer
pub const TERMINATED: DocNo = DocNo::MAX;

pub trait Scorer {
    /// Current document, or `TERMINATED`
    fn doc(&self) -> DocNo;

    /// Move to the next match
    fn advance(&mut self) -> Result<DocNo>;

    /// Move to the first match >= `target`; never moves backwards
    fn seek(&mut self, target: DocNo) -> Result<DocNo>;

    /// Score of the current document
    fn score(&mut self) -> f32;

    /// Upper bound on the number of matches
    fn cost(&self) -> u64;
}

pub type BoxedScorer<'a> = Box<dyn Scorer + 'a>;

fn next_doc(doc: DocNo) -> DocNo {
    DocNo::new(doc.as_u32().saturating_add(1))
}

/// BM25 length normalization inputs of one field in one segment
#[derive(Clone)]
pub struct FieldNorms<'a> {
    pub bm25: Bm25Params,
    pub lengths: Option<&'a FieldLengths>,
    /// Average length over the whole snapshot
    pub avg_len: f32,
}

impl FieldNorms<'_> {
    fn score(&self, freq: u32, weight: f32, docno: DocNo) -> f32 {
        let len = self.lengths.map(|l| l.get(docno)).unwrap_or(0);
        self.bm25.score(freq as f32, weight, len, self.avg_len)
    }
}

/// Matches nothing
pub struct EmptyScorer;

impl Scorer for EmptyScorer {
    fn doc(&self) -> DocNo {
        TERMINATED
    }

    fn advance(&mut self) -> Result<DocNo> {
        Ok(TERMINATED)
    }

    fn seek(&mut self, _target: DocNo) -> Result<DocNo> {
        Ok(TERMINATED)
    }

    fn score(&mut self) -> f32 {
        0.0
    }

    fn cost(&self) -> u64 {
        0
    }
}

/// Every document of a segment with a constant score
pub struct AllScorer {
    doc: DocNo,
    doc_count: u32,
    score: f32,
}

impl AllScorer {
    pub fn new(doc_count: u32, score: f32) -> Self {
        let doc = if doc_count == 0 {
            TERMINATED
        } else {
            DocNo::new(0)
        };
        Self {
            doc,
            doc_count,
            score,
        }
    }
}

impl Scorer for AllScorer {
    fn doc(&self) -> DocNo {
        self.doc
    }

    fn advance(&mut self) -> Result<DocNo> {
        let target = next_doc(self.doc);
        self.seek(target)
    }

    fn seek(&mut self, target: DocNo) -> Result<DocNo> {
        if target > self.doc {
            self.doc = if target.as_u32() < self.doc_count {
                target
            } else {
                TERMINATED
            };
        }
        Ok(self.doc)
    }

    fn score(&mut self) -> f32 {
        self.score
    }

    fn cost(&self) -> u64 {
        self.doc_count as u64
    }
}

/// Posting list of a single term, scored with BM25
pub struct TermScorer<'a> {
    postings: PostingIterator<'a>,
    doc: DocNo,
    /// idf times boost
    weight: f32,
    norms: FieldNorms<'a>,
    doc_frequency: u64,
}

impl<'a> TermScorer<'a> {
    pub fn new(
        mut postings: PostingIterator<'a>,
        weight: f32,
        norms: FieldNorms<'a>,
        doc_frequency: u64,
    ) -> Result<Self> {
        let doc = postings.advance()?.unwrap_or(TERMINATED);
        Ok(Self {
            postings,
            doc,
            weight,
            norms,
            doc_frequency,
        })
    }
}

impl Scorer for TermScorer<'_> {
    fn doc(&self) -> DocNo {
        self.doc
    }

    fn advance(&mut self) -> Result<DocNo> {
        if self.doc != TERMINATED {
            self.doc = self.postings.advance()?.unwrap_or(TERMINATED);
        }
        Ok(self.doc)
    }

    fn seek(&mut self, target: DocNo) -> Result<DocNo> {
        if self.doc != TERMINATED && self.doc < target {
            self.doc = self.postings.skip_to(target)?.unwrap_or(TERMINATED);
        }
        Ok(self.doc)
    }

    fn score(&mut self) -> f32 {
        self.norms
            .score(self.postings.term_frequency(), self.weight, self.doc)
    }

    fn cost(&self) -> u64 {
        self.doc_frequency
    }
}

/// Documents containing every term at `start + relative position`
///
/// The term cursors are intersected first; positions are only checked for
/// documents that contain all terms.
pub struct PhraseScorer<'a> {
    terms: Vec<(PostingIterator<'a>, u32)>,
    doc: DocNo,
    /// Phrase occurrences in the current document
    freq: u32,
    weight: f32,
    norms: FieldNorms<'a>,
    cost: u64,
}

impl<'a> PhraseScorer<'a> {
    /// `terms` pairs each posting list with its position relative to the
    /// first phrase token
    pub fn new(
        terms: Vec<(PostingIterator<'a>, u32)>,
        weight: f32,
        norms: FieldNorms<'a>,
        cost: u64,
    ) -> Result<Self> {
        let mut scorer = Self {
            terms,
            doc: DocNo::new(0),
            freq: 0,
            weight,
            norms,
            cost,
        };
        if scorer.terms.is_empty() {
            scorer.doc = TERMINATED;
        } else {
            scorer.find_from(DocNo::new(0))?;
        }
        Ok(scorer)
    }

    /// Leapfrog every term cursor to a common document >= `target`
    fn align(&mut self, mut target: DocNo) -> Result<DocNo> {
        'outer: loop {
            for (postings, _) in self.terms.iter_mut() {
                match postings.skip_to(target)? {
                    None => return Ok(TERMINATED),
                    Some(doc) if doc > target => {
                        target = doc;
                        continue 'outer;
                    }
                    Some(_) => {}
                }
            }
            return Ok(target);
        }
    }

    fn phrase_freq(&self) -> u32 {
        let Some(((first, first_rel), rest)) = self.terms.split_first() else {
            return 0;
        };

        let mut freq = 0;
        for &pos in first.positions() {
            let Some(start) = pos.checked_sub(*first_rel) else {
                continue;
            };
            let all_present = rest
                .iter()
                .all(|(postings, rel)| postings.positions().binary_search(&(start + rel)).is_ok());
            if all_present {
                freq += 1;
            }
        }
        freq
    }

    fn find_from(&mut self, mut target: DocNo) -> Result<DocNo> {
        loop {
            let doc = self.align(target)?;
            if doc == TERMINATED {
                self.doc = TERMINATED;
                return Ok(TERMINATED);
            }
            let freq = self.phrase_freq();
            if freq > 0 {
                self.doc = doc;
                self.freq = freq;
                return Ok(doc);
            }
            target = next_doc(doc);
        }
    }
}

impl Scorer for PhraseScorer<'_> {
    fn doc(&self) -> DocNo {
        self.doc
    }

    fn advance(&mut self) -> Result<DocNo> {
        if self.doc == TERMINATED {
            return Ok(TERMINATED);
        }
        self.find_from(next_doc(self.doc))
    }

    fn seek(&mut self, target: DocNo) -> Result<DocNo> {
        if self.doc == TERMINATED || self.doc >= target {
            return Ok(self.doc);
        }
        self.find_from(target)
    }

    fn score(&mut self) -> f32 {
        self.norms.score(self.freq, self.weight, self.doc)
    }

    fn cost(&self) -> u64 {
        self.cost
    }
}

/// Documents matching any child; scores are summed over matching children
pub struct UnionScorer<'a> {
    children: Vec<BoxedScorer<'a>>,
    doc: DocNo,
}

impl<'a> UnionScorer<'a> {
    pub fn new(children: Vec<BoxedScorer<'a>>) -> Self {
        let mut scorer = Self {
            children,
            doc: TERMINATED,
        };
        scorer.update_doc();
        scorer
    }

    fn update_doc(&mut self) {
        self.doc = self
            .children
            .iter()
            .map(|c| c.doc())
            .min()
            .unwrap_or(TERMINATED);
    }
}

impl Scorer for UnionScorer<'_> {
    fn doc(&self) -> DocNo {
        self.doc
    }

    fn advance(&mut self) -> Result<DocNo> {
        if self.doc == TERMINATED {
            return Ok(TERMINATED);
        }
        let current = self.doc;
        for child in self.children.iter_mut() {
            if child.doc() == current {
                child.advance()?;
            }
        }
        self.update_doc();
        Ok(self.doc)
    }

    fn seek(&mut self, target: DocNo) -> Result<DocNo> {
        if self.doc >= target {
            return Ok(self.doc);
        }
        for child in self.children.iter_mut() {
            if child.doc() < target {
                child.seek(target)?;
            }
        }
        self.update_doc();
        Ok(self.doc)
    }

    fn score(&mut self) -> f32 {
        let current = self.doc;
        self.children
            .iter_mut()
            .filter(|c| c.doc() == current)
            .map(|c| c.score())
            .sum()
    }

    fn cost(&self) -> u64 {
        self.children.iter().map(|c| c.cost()).sum()
    }
}

/// Documents matching every child, driven by the cheapest one
pub struct IntersectionScorer<'a> {
    children: Vec<BoxedScorer<'a>>,
    doc: DocNo,
}

impl<'a> IntersectionScorer<'a> {
    pub fn new(mut children: Vec<BoxedScorer<'a>>) -> Result<Self> {
        children.sort_by_key(|c| c.cost());
        let mut scorer = Self {
            children,
            doc: TERMINATED,
        };
        let start = scorer.children.first().map(|c| c.doc()).unwrap_or(TERMINATED);
        scorer.doc = scorer.align(start)?;
        Ok(scorer)
    }

    fn align(&mut self, mut target: DocNo) -> Result<DocNo> {
        'outer: loop {
            if target == TERMINATED {
                return Ok(TERMINATED);
            }
            for child in self.children.iter_mut() {
                let doc = child.seek(target)?;
                if doc != target {
                    target = doc;
                    continue 'outer;
                }
            }
            return Ok(target);
        }
    }
}

impl Scorer for IntersectionScorer<'_> {
    fn doc(&self) -> DocNo {
        self.doc
    }

    fn advance(&mut self) -> Result<DocNo> {
        if self.doc == TERMINATED {
            return Ok(TERMINATED);
        }
        let Some(lead) = self.children.first_mut() else {
            return Ok(TERMINATED);
        };
        let next = lead.advance()?;
        self.doc = self.align(next)?;
        Ok(self.doc)
    }

    fn seek(&mut self, target: DocNo) -> Result<DocNo> {
        if self.doc >= target {
            return Ok(self.doc);
        }
        self.doc = self.align(target)?;
        Ok(self.doc)
    }

    fn score(&mut self) -> f32 {
        self.children.iter_mut().map(|c| c.score()).sum()
    }

    fn cost(&self) -> u64 {
        self.children.first().map(|c| c.cost()).unwrap_or(0)
    }
}

/// Documents of `include` that `exclude` does not match
pub struct ExcludeScorer<'a> {
    include: BoxedScorer<'a>,
    exclude: BoxedScorer<'a>,
    doc: DocNo,
}

impl<'a> ExcludeScorer<'a> {
    pub fn new(include: BoxedScorer<'a>, exclude: BoxedScorer<'a>) -> Result<Self> {
        let mut scorer = Self {
            include,
            exclude,
            doc: TERMINATED,
        };
        scorer.doc = scorer.skip_excluded()?;
        Ok(scorer)
    }

    fn skip_excluded(&mut self) -> Result<DocNo> {
        let mut doc = self.include.doc();
        while doc != TERMINATED && self.exclude.seek(doc)? == doc {
            doc = self.include.advance()?;
        }
        Ok(doc)
    }
}

impl Scorer for ExcludeScorer<'_> {
    fn doc(&self) -> DocNo {
        self.doc
    }

    fn advance(&mut self) -> Result<DocNo> {
        if self.doc == TERMINATED {
            return Ok(TERMINATED);
        }
        self.include.advance()?;
        self.doc = self.skip_excluded()?;
        Ok(self.doc)
    }

    fn seek(&mut self, target: DocNo) -> Result<DocNo> {
        if self.doc >= target {
            return Ok(self.doc);
        }
        self.include.seek(target)?;
        self.doc = self.skip_excluded()?;
        Ok(self.doc)
    }

    fn score(&mut self) -> f32 {
        self.include.score()
    }

    fn cost(&self) -> u64 {
        self.include.cost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scorer over a fixed docno list, scoring 1.0 per match
    struct ListScorer {
        docs: Vec<u32>,
        idx: usize,
    }

    impl ListScorer {
        fn boxed(docs: &[u32]) -> BoxedScorer<'static> {
            Box::new(ListScorer {
                docs: docs.to_vec(),
                idx: 0,
            })
        }
    }

    impl Scorer for ListScorer {
        fn doc(&self) -> DocNo {
            self.docs.get(self.idx).map(|&d| DocNo::new(d)).unwrap_or(TERMINATED)
        }

        fn advance(&mut self) -> Result<DocNo> {
            self.idx += 1;
            Ok(self.doc())
        }

        fn seek(&mut self, target: DocNo) -> Result<DocNo> {
            while self.doc() < target {
                self.idx += 1;
            }
            Ok(self.doc())
        }

        fn score(&mut self) -> f32 {
            1.0
        }

        fn cost(&self) -> u64 {
            self.docs.len() as u64
        }
    }

    fn collect(scorer: &mut dyn Scorer) -> Vec<(u32, f32)> {
        let mut out = Vec::new();
        let mut doc = scorer.doc();
        while doc != TERMINATED {
            out.push((doc.as_u32(), scorer.score()));
            doc = scorer.advance().unwrap();
        }
        out
    }

    #[test]
    fn test_union_sums_scores() {
        let mut union = UnionScorer::new(vec![
            ListScorer::boxed(&[1, 3, 5]),
            ListScorer::boxed(&[3, 4]),
            ListScorer::boxed(&[]),
        ]);
        assert_eq!(
            collect(&mut union),
            vec![(1, 1.0), (3, 2.0), (4, 1.0), (5, 1.0)]
        );
    }

    #[test]
    fn test_intersection_leapfrogs() {
        let mut and = IntersectionScorer::new(vec![
            ListScorer::boxed(&[1, 2, 3, 7, 9, 12]),
            ListScorer::boxed(&[2, 7, 12, 20]),
            ListScorer::boxed(&[0, 2, 5, 7, 8, 12]),
        ])
        .unwrap();
        assert_eq!(collect(&mut and), vec![(2, 3.0), (7, 3.0), (12, 3.0)]);
    }

    #[test]
    fn test_intersection_with_empty_child() {
        let mut and =
            IntersectionScorer::new(vec![ListScorer::boxed(&[1, 2]), ListScorer::boxed(&[])])
                .unwrap();
        assert_eq!(and.doc(), TERMINATED);
    }

    #[test]
    fn test_exclusion() {
        let mut not = ExcludeScorer::new(
            ListScorer::boxed(&[1, 2, 3, 4, 5]),
            ListScorer::boxed(&[1, 4, 6]),
        )
        .unwrap();
        assert_eq!(collect(&mut not), vec![(2, 1.0), (3, 1.0), (5, 1.0)]);
    }

    #[test]
    fn test_all_scorer_with_exclusion_and_seek() {
        let mut not = ExcludeScorer::new(
            Box::new(AllScorer::new(6, 1.0)),
            ListScorer::boxed(&[0, 2, 3]),
        )
        .unwrap();
        assert_eq!(not.doc(), DocNo::new(1));
        assert_eq!(not.seek(DocNo::new(2)).unwrap(), DocNo::new(4));
        assert_eq!(not.advance().unwrap(), DocNo::new(5));
        assert_eq!(not.advance().unwrap(), TERMINATED);

        assert_eq!(AllScorer::new(0, 1.0).doc(), TERMINATED);
    }
}
