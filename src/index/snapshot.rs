//! Immutable point-in-time view of a committed generation

use std::collections::BTreeSet;

use crate::error::{QuarryError, Result};
use crate::models::StoredDocument;
use crate::segment::{DocNo, DocumentId, Generation, IndexStatistics, SegmentView};

/// The segments and tombstones of one generation, plus the statistics
/// derived from them. Never mutated after publication.
#[derive(Clone, Default)]
pub struct Snapshot {
    generation: Generation,
    segments: Vec<SegmentView>,
    stats: IndexStatistics,
}

impl Snapshot {
    pub fn new(generation: Generation, segments: Vec<SegmentView>) -> Self {
        let stats = IndexStatistics::aggregate(segments.iter().map(|s| s.reader.stats()));
        Self {
            generation,
            segments,
            stats,
        }
    }

    /// Snapshot of an index with no commits
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn segments(&self) -> &[SegmentView] {
        &self.segments
    }

    pub fn stats(&self) -> &IndexStatistics {
        &self.stats
    }

    /// Live (not tombstoned) documents
    pub fn num_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.live_doc_count() as u64).sum()
    }

    /// Documents across all segments, tombstoned ones included
    pub fn total_docs(&self) -> u64 {
        self.stats.total_docs
    }

    pub fn deleted_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.deleted_count() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.num_docs() == 0
    }

    /// Segment and docno of a live document
    pub fn find_live(&self, doc_id: DocumentId) -> Option<(&SegmentView, DocNo)> {
        self.segments
            .iter()
            .find_map(|segment| segment.live_docno(doc_id).map(|docno| (segment, docno)))
    }

    pub fn contains(&self, doc_id: DocumentId) -> bool {
        self.find_live(doc_id).is_some()
    }

    /// Stored fields of a live document
    pub fn doc(&self, doc_id: DocumentId) -> Result<StoredDocument> {
        let (segment, docno) = self
            .find_live(doc_id)
            .ok_or(QuarryError::DocumentNotFound(doc_id))?;
        segment.reader.stored_document(docno)
    }

    /// Distinct indexed terms of `field` across every segment, sorted
    pub fn field_terms(&self, field: &str) -> Vec<String> {
        let mut terms = BTreeSet::new();
        for segment in &self.segments {
            terms.extend(segment.reader.terms().field_terms(field));
        }
        terms.into_iter().collect()
    }

    /// Documents containing the term, tombstoned ones included
    pub fn doc_frequency(&self, field: &str, token: &str) -> u64 {
        self.segments
            .iter()
            .map(|s| s.reader.doc_frequency(field, token) as u64)
            .sum()
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("generation", &self.generation)
            .field("segments", &self.segments.len())
            .field("total_docs", &self.stats.total_docs)
            .finish()
    }
}
