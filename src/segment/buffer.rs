//! Mutable buffer for in-memory writes
//!
//! Holds analyzed documents until they are flushed to an immutable segment.
//! Documents are appended with increasing ids, so postings stay sorted by
//! docno without any extra work.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::statistics::SegmentStatistics;
use super::types::{term_key, DocNo, DocumentId, Posting};
use crate::models::FieldValue;

/// Configuration for buffer flush triggers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Flush when buffer size exceeds this (bytes)
    pub max_bytes: usize,
    /// Flush when document count exceeds this
    pub max_docs: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            // 64MB
            max_bytes: 64 * 1024 * 1024,
            max_docs: 10_000,
        }
    }
}

impl BufferConfig {
    pub fn new(max_docs: usize, max_bytes: usize) -> Self {
        Self {
            max_bytes,
            max_docs,
        }
    }
}

/// One indexed field of a document after analysis
#[derive(Clone, Debug, Default)]
pub struct AnalyzedField {
    pub name: String,
    /// Number of tokens kept by the analyzer
    pub length: u32,
    /// Token text to its positions, ascending
    pub terms: HashMap<String, Vec<u32>>,
}

/// A document ready to be buffered
#[derive(Clone, Debug, Default)]
pub struct AnalyzedDocument {
    pub fields: Vec<AnalyzedField>,
    /// Values of stored fields, in schema order
    pub stored: Vec<FieldValue>,
}

/// In-memory mutable buffer for recent writes
#[derive(Debug, Default)]
pub struct MutableBuffer {
    /// Term key to postings mapping
    terms: HashMap<Vec<u8>, Vec<Posting>>,
    /// DocNo to external document ID mapping
    doc_ids: Vec<DocumentId>,
    /// Stored field values by docno
    stored: Vec<Vec<FieldValue>>,
    /// Delete bitset (docnos that are deleted)
    deleted: Vec<bool>,
    stats: SegmentStatistics,
    /// Approximate size in bytes
    size_bytes: usize,
    /// Document ID to DocNo lookup (for deletes)
    doc_id_to_docno: HashMap<DocumentId, DocNo>,
}

impl MutableBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a document into the buffer
    ///
    /// Returns the assigned DocNo for this document.
    pub fn index_document(&mut self, doc_id: DocumentId, doc: AnalyzedDocument) -> DocNo {
        let lengths: HashMap<String, u32> = doc
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.length))
            .collect();
        let docno = self.stats.add_document(&lengths);

        self.doc_ids.push(doc_id);
        self.deleted.push(false);
        self.doc_id_to_docno.insert(doc_id, docno);

        for field in doc.fields {
            for (token, positions) in field.terms {
                let key = term_key(&field.name, &token);
                self.size_bytes +=
                    std::mem::size_of::<Posting>() + key.len() + positions.len() * 4;
                self.terms
                    .entry(key)
                    .or_default()
                    .push(Posting::with_positions(docno, positions));
            }
        }

        self.size_bytes += doc
            .stored
            .iter()
            .map(|v| v.name.len() + v.text.len())
            .sum::<usize>();
        self.stored.push(doc.stored);

        docno
    }

    /// Mark a document as deleted; false if it is unknown or already deleted
    pub fn delete_document(&mut self, doc_id: DocumentId) -> bool {
        if let Some(&docno) = self.doc_id_to_docno.get(&doc_id) {
            if let Some(deleted) = self.deleted.get_mut(docno.as_usize()) {
                if !*deleted {
                    *deleted = true;
                    return true;
                }
            }
        }
        false
    }

    /// Check if a document exists and is not deleted
    pub fn contains_document(&self, doc_id: DocumentId) -> bool {
        self.doc_id_to_docno
            .get(&doc_id)
            .map(|docno| !self.is_deleted(*docno))
            .unwrap_or(false)
    }

    pub fn get_postings(&self, key: &[u8]) -> Option<&Vec<Posting>> {
        self.terms.get(key)
    }

    pub fn is_deleted(&self, docno: DocNo) -> bool {
        self.deleted.get(docno.as_usize()).copied().unwrap_or(false)
    }

    pub fn doc_id(&self, docno: DocNo) -> Option<DocumentId> {
        self.doc_ids.get(docno.as_usize()).copied()
    }

    pub fn stored_fields(&self, docno: DocNo) -> Option<&[FieldValue]> {
        self.stored.get(docno.as_usize()).map(Vec::as_slice)
    }

    pub fn stats(&self) -> &SegmentStatistics {
        &self.stats
    }

    pub fn doc_count(&self) -> u32 {
        self.stats.doc_count
    }

    /// Live document count (excluding deleted)
    pub fn live_doc_count(&self) -> u32 {
        self.deleted.iter().filter(|&&d| !d).count() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Check if buffer should be flushed
    pub fn should_flush(&self, config: &BufferConfig) -> bool {
        self.size_bytes >= config.max_bytes || self.doc_count() as usize >= config.max_docs
    }

    /// Term keys in sorted order (for segment writing)
    pub fn sorted_terms(&self) -> Vec<&[u8]> {
        let mut keys: Vec<&[u8]> = self.terms.keys().map(Vec::as_slice).collect();
        keys.sort_unstable();
        keys
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Take the buffered contents, leaving an empty buffer behind
    pub fn take(&mut self) -> MutableBuffer {
        std::mem::take(self)
    }

    /// Clear the buffer (after flush or rollback)
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
