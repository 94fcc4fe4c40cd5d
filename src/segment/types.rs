//! Core types for the segment-based index

use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::models::DocumentId;

/// Commit generation number; 0 is the empty index
pub type Generation = u64;

/// Segment identifier (monotonically increasing per index)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment_{}", self.0)
    }
}

/// Dense document number within a segment (0..doc_count)
///
/// Docno order equals `DocumentId` order inside a segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocNo(pub u32);

impl DocNo {
    /// Sentinel for "no document" (exhausted cursors, dropped docs in remaps)
    pub const MAX: DocNo = DocNo(u32::MAX);

    pub fn new(n: u32) -> Self {
        Self(n)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Separator between field name and token in term keys
pub const FIELD_SEPARATOR: u8 = 0;

/// A term: a normalized token scoped to a field
///
/// Encoded as `field ++ 0x00 ++ token`, so all terms of one field form a
/// contiguous, sorted range in the term dictionary.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Term {
    pub field: String,
    pub text: String,
}

impl Term {
    pub fn new(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            text: text.into(),
        }
    }

    pub fn to_key(&self) -> Vec<u8> {
        term_key(&self.field, &self.text)
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        split_term_key(key).map(|(field, text)| Term::new(field, text))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.text)
    }
}

pub fn term_key(field: &str, text: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(field.len() + 1 + text.len());
    key.extend_from_slice(field.as_bytes());
    key.push(FIELD_SEPARATOR);
    key.extend_from_slice(text.as_bytes());
    key
}

/// Lower bound (inclusive) and upper bound (exclusive) of a field's keys
pub fn field_key_range(field: &str) -> (Vec<u8>, Vec<u8>) {
    let mut lower = field.as_bytes().to_vec();
    lower.push(FIELD_SEPARATOR);
    let mut upper = field.as_bytes().to_vec();
    upper.push(FIELD_SEPARATOR + 1);
    (lower, upper)
}

pub fn split_term_key(key: &[u8]) -> Option<(&str, &str)> {
    let sep = key.iter().position(|&b| b == FIELD_SEPARATOR)?;
    let field = std::str::from_utf8(&key[..sep]).ok()?;
    let text = std::str::from_utf8(&key[sep + 1..]).ok()?;
    Some((field, text))
}

/// A single posting entry within a posting list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Dense document number within the segment
    pub docno: DocNo,
    /// Term frequency in this document
    pub term_frequency: u32,
    /// Token positions, ascending
    pub positions: Vec<u32>,
}

impl Posting {
    pub fn new(docno: DocNo, term_frequency: u32) -> Self {
        Self {
            docno,
            term_frequency,
            positions: Vec::new(),
        }
    }

    pub fn with_positions(docno: DocNo, positions: Vec<u32>) -> Self {
        Self {
            docno,
            term_frequency: positions.len() as u32,
            positions,
        }
    }
}

/// Postings per block; each block gets one skip entry
pub const BLOCK_SIZE: usize = 128;

/// A block of postings being assembled by the writer
#[derive(Clone, Debug, Default)]
pub struct PostingBlock {
    pub docnos: Vec<DocNo>,
    pub term_frequencies: Vec<u32>,
    pub positions: Vec<Vec<u32>>,
    /// Maximum document number in this block (for skip data)
    pub max_docno: DocNo,
    pub max_tf: u32,
}

impl PostingBlock {
    pub fn new() -> Self {
        Self {
            docnos: Vec::with_capacity(BLOCK_SIZE),
            term_frequencies: Vec::with_capacity(BLOCK_SIZE),
            positions: Vec::with_capacity(BLOCK_SIZE),
            max_docno: DocNo(0),
            max_tf: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.docnos.len() >= BLOCK_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.docnos.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docnos.len()
    }

    pub fn push(&mut self, posting: Posting) {
        if posting.docno > self.max_docno {
            self.max_docno = posting.docno;
        }
        if posting.term_frequency > self.max_tf {
            self.max_tf = posting.term_frequency;
        }
        self.docnos.push(posting.docno);
        self.term_frequencies.push(posting.term_frequency);
        self.positions.push(posting.positions);
    }
}

/// Posting list metadata stored in the term dictionary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingListMeta {
    /// Offset in the postings file
    pub offset: u64,
    /// Length in bytes
    pub length: u64,
    /// Number of documents containing this term
    pub doc_frequency: u32,
    /// Total term frequency across all documents
    pub total_term_frequency: u64,
}
