//! Immutable segment reader
//!
//! Each segment reader provides access to postings, the term dictionary,
//! stored fields and field-length statistics. A `SegmentView` pairs a
//! reader with the tombstones of one generation.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;

use super::docno_map::DocNoMap;
use super::postings::{PostingIterator, PostingsReader};
use super::statistics::SegmentStatistics;
use super::stored::StoredFieldsReader;
use super::term_dict::TermDictionary;
use super::types::{DocNo, DocumentId, PostingListMeta, SegmentId};
use crate::error::Result;
use crate::models::StoredDocument;

/// Metadata for a segment stored in the manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: SegmentId,
    /// Number of documents in the segment (tombstoned ones included)
    pub doc_count: u32,
    pub min_doc_id: DocumentId,
    pub max_doc_id: DocumentId,
    /// Size in bytes (all segment files combined)
    pub size_bytes: u64,
    /// Creation timestamp (ms)
    pub created_at: u64,
}

/// Immutable segment reader backed by in-memory data
pub struct SegmentReader {
    meta: SegmentMeta,
    terms: TermDictionary,
    postings: PostingsReader,
    stored: StoredFieldsReader,
    stats: SegmentStatistics,
    docno_map: DocNoMap,
}

impl SegmentReader {
    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn id(&self) -> SegmentId {
        self.meta.id
    }

    pub fn terms(&self) -> &TermDictionary {
        &self.terms
    }

    pub fn get_posting_meta(&self, field: &str, token: &str) -> Option<&PostingListMeta> {
        self.terms.get(field, token)
    }

    /// Get a posting cursor for a term
    pub fn get_postings(&self, field: &str, token: &str) -> io::Result<Option<PostingIterator<'_>>> {
        match self.terms.get(field, token) {
            Some(meta) => Ok(Some(self.postings.get_postings(meta)?)),
            None => Ok(None),
        }
    }

    pub fn postings_for(&self, meta: &PostingListMeta) -> io::Result<PostingIterator<'_>> {
        self.postings.get_postings(meta)
    }

    pub fn doc_frequency(&self, field: &str, token: &str) -> u32 {
        self.terms
            .get(field, token)
            .map(|m| m.doc_frequency)
            .unwrap_or(0)
    }

    pub fn get_doc_id(&self, docno: DocNo) -> Option<DocumentId> {
        self.docno_map.get_doc_id(docno)
    }

    pub fn find_docno(&self, doc_id: DocumentId) -> Option<DocNo> {
        self.docno_map.find_docno(doc_id)
    }

    pub fn field_length(&self, field: &str, docno: DocNo) -> u32 {
        self.stats.field_length(field, docno)
    }

    pub fn stats(&self) -> &SegmentStatistics {
        &self.stats
    }

    pub fn docno_map(&self) -> &DocNoMap {
        &self.docno_map
    }

    pub fn stored(&self) -> &StoredFieldsReader {
        &self.stored
    }

    pub fn stored_document(&self, docno: DocNo) -> Result<StoredDocument> {
        self.stored.get(docno)
    }

    /// Get the number of documents (including deleted)
    pub fn doc_count(&self) -> u32 {
        self.meta.doc_count
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }
}

/// Builder for creating segment readers from serialized data
#[derive(Default)]
pub struct SegmentReaderBuilder {
    meta: Option<SegmentMeta>,
    terms_data: Option<(Vec<u8>, Vec<PostingListMeta>)>,
    postings_data: Option<Vec<u8>>,
    stored_data: Option<Vec<u8>>,
    stats: Option<SegmentStatistics>,
    docno_map: Option<DocNoMap>,
}

impl SegmentReaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_meta(mut self, meta: SegmentMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_terms(mut self, fst_data: Vec<u8>, metadata: Vec<PostingListMeta>) -> Self {
        self.terms_data = Some((fst_data, metadata));
        self
    }

    pub fn with_postings(mut self, data: Vec<u8>) -> Self {
        self.postings_data = Some(data);
        self
    }

    pub fn with_stored(mut self, data: Vec<u8>) -> Self {
        self.stored_data = Some(data);
        self
    }

    pub fn with_stats(mut self, stats: SegmentStatistics) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_docno_map(mut self, docno_map: DocNoMap) -> Self {
        self.docno_map = Some(docno_map);
        self
    }

    pub fn build(self) -> Result<SegmentReader> {
        let missing = |what: &str| io::Error::new(io::ErrorKind::InvalidInput, format!("Missing {}", what));

        let meta = self.meta.ok_or_else(|| missing("segment meta"))?;
        let (fst_data, term_meta) = self.terms_data.ok_or_else(|| missing("terms data"))?;
        let postings_data = self.postings_data.ok_or_else(|| missing("postings data"))?;
        let stored_data = self.stored_data.ok_or_else(|| missing("stored fields"))?;
        let docno_map = self.docno_map.ok_or_else(|| missing("docno map"))?;
        let stats = self.stats.unwrap_or_default();

        Ok(SegmentReader {
            meta,
            terms: TermDictionary::new(fst_data, term_meta)?,
            postings: PostingsReader::new(postings_data),
            stored: StoredFieldsReader::open(stored_data)?,
            stats,
            docno_map,
        })
    }
}

/// A segment as seen by one generation: the reader plus its tombstones
#[derive(Clone)]
pub struct SegmentView {
    pub reader: Arc<SegmentReader>,
    pub deletes: Arc<RoaringBitmap>,
}

impl SegmentView {
    pub fn new(reader: Arc<SegmentReader>, deletes: Arc<RoaringBitmap>) -> Self {
        Self { reader, deletes }
    }

    pub fn id(&self) -> SegmentId {
        self.reader.id()
    }

    pub fn is_deleted(&self, docno: DocNo) -> bool {
        self.deletes.contains(docno.as_u32())
    }

    pub fn is_live(&self, docno: DocNo) -> bool {
        docno.as_u32() < self.reader.doc_count() && !self.is_deleted(docno)
    }

    pub fn doc_count(&self) -> u32 {
        self.reader.doc_count()
    }

    pub fn deleted_count(&self) -> u32 {
        self.deletes.len() as u32
    }

    pub fn live_doc_count(&self) -> u32 {
        self.doc_count().saturating_sub(self.deleted_count())
    }

    /// Fraction of tombstoned documents (for merge policy decisions)
    pub fn delete_ratio(&self) -> f64 {
        if self.doc_count() == 0 {
            0.0
        } else {
            self.deleted_count() as f64 / self.doc_count() as f64
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.reader.meta().size_bytes
    }

    /// Docno of `doc_id` if it lives in this segment and is not tombstoned
    pub fn live_docno(&self, doc_id: DocumentId) -> Option<DocNo> {
        let meta = self.reader.meta();
        if doc_id < meta.min_doc_id || doc_id > meta.max_doc_id {
            return None;
        }
        self.reader
            .find_docno(doc_id)
            .filter(|&docno| !self.is_deleted(docno))
    }

    /// Same reader with `docno` additionally tombstoned
    pub fn with_deleted(&self, docnos: impl IntoIterator<Item = DocNo>) -> SegmentView {
        let mut deletes = (*self.deletes).clone();
        for docno in docnos {
            deletes.insert(docno.as_u32());
        }
        SegmentView::new(Arc::clone(&self.reader), Arc::new(deletes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use crate::segment::postings::PostingsWriter;
    use crate::segment::stored::StoredFieldsWriter;
    use crate::segment::term_dict::TermDictionaryBuilder;
    use crate::segment::types::{term_key, Posting};
    use std::collections::HashMap;

    fn create_test_segment() -> SegmentReader {
        let mut postings_writer = PostingsWriter::new();
        let mut term_builder = TermDictionaryBuilder::new();

        postings_writer.start_posting_list();
        postings_writer.add_posting(Posting::with_positions(DocNo(0), vec![0, 3]));
        postings_writer.add_posting(Posting::with_positions(DocNo(2), vec![1]));
        term_builder.add(term_key("body", "hello"), postings_writer.finish_posting_list());

        postings_writer.start_posting_list();
        postings_writer.add_posting(Posting::with_positions(DocNo(1), vec![0, 1, 2]));
        postings_writer.add_posting(Posting::with_positions(DocNo(2), vec![0, 4]));
        term_builder.add(term_key("body", "world"), postings_writer.finish_posting_list());

        let term_dict = term_builder.build().unwrap();

        let mut docno_map = DocNoMap::new();
        let mut stats = SegmentStatistics::new();
        let mut stored = StoredFieldsWriter::new();
        for (doc_id, len) in [(100u64, 5u32), (200, 3), (300, 6)] {
            docno_map.add(doc_id);
            stats.add_document(&HashMap::from([("body".to_string(), len)]));
            stored
                .add(&[FieldValue::new("title", format!("doc {}", doc_id))])
                .unwrap();
        }

        let meta = SegmentMeta {
            id: SegmentId::new(1),
            doc_count: 3,
            min_doc_id: 100,
            max_doc_id: 300,
            size_bytes: 1000,
            created_at: 0,
        };

        SegmentReaderBuilder::new()
            .with_meta(meta)
            .with_terms(term_dict.fst_bytes().to_vec(), term_dict.metadata().to_vec())
            .with_postings(postings_writer.into_data())
            .with_stored(stored.finish())
            .with_stats(stats)
            .with_docno_map(docno_map)
            .build()
            .unwrap()
    }

    #[test]
    fn test_segment_reader_basic() {
        let reader = create_test_segment();

        assert_eq!(reader.id(), SegmentId::new(1));
        assert_eq!(reader.doc_count(), 3);
        assert_eq!(reader.term_count(), 2);

        assert!(reader.get_posting_meta("body", "hello").is_some());
        assert!(reader.get_posting_meta("title", "hello").is_none());
        assert_eq!(reader.doc_frequency("body", "world"), 2);
        assert_eq!(reader.doc_frequency("body", "foo"), 0);
        assert_eq!(reader.field_length("body", DocNo(2)), 6);
    }

    #[test]
    fn test_segment_reader_docs() {
        let reader = create_test_segment();

        assert_eq!(reader.get_doc_id(DocNo(1)), Some(200));
        assert_eq!(reader.find_docno(300), Some(DocNo(2)));
        assert_eq!(
            reader.stored_document(DocNo(0)).unwrap().get("title"),
            Some("doc 100")
        );
    }

    #[test]
    fn test_segment_reader_postings() {
        let reader = create_test_segment();

        let postings = reader
            .get_postings("body", "hello")
            .unwrap()
            .unwrap()
            .read_all()
            .unwrap();

        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].docno, DocNo(0));
        assert_eq!(postings[0].positions, vec![0, 3]);
        assert_eq!(postings[1].term_frequency, 1);
        assert!(reader.get_postings("body", "nope").unwrap().is_none());
    }

    #[test]
    fn test_segment_view_tombstones() {
        let view = SegmentView::new(Arc::new(create_test_segment()), Arc::new(RoaringBitmap::new()));
        assert_eq!(view.live_docno(200), Some(DocNo(1)));
        assert_eq!(view.live_docno(50), None);

        let deleted = view.with_deleted([DocNo(1)]);
        assert!(deleted.is_deleted(DocNo(1)));
        assert_eq!(deleted.live_docno(200), None);
        assert_eq!(deleted.live_doc_count(), 2);
        assert!((deleted.delete_ratio() - 1.0 / 3.0).abs() < 1e-9);
        // The original view is untouched
        assert!(!view.is_deleted(DocNo(1)));
    }
}
