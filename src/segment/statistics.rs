//! Field-length statistics and BM25 scoring
//!
//! Every segment stores one length per document for each indexed field.
//! A snapshot aggregates them into index-wide totals so that scores do not
//! depend on how documents happen to be distributed across segments.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::types::DocNo;

/// BM25 parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term frequency saturation parameter
    pub k1: f32,
    /// Length normalization parameter
    pub b: f32,
    /// BM25+ lower bound added to every matching term (0 = classic BM25)
    #[serde(default)]
    pub delta: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            delta: 0.0,
        }
    }
}

impl Bm25Params {
    pub fn new(k1: f32, b: f32) -> Self {
        Self { k1, b, delta: 0.0 }
    }

    /// Robertson-Sparck-Jones IDF, always positive
    pub fn idf(&self, df: u64, total_docs: u64) -> f32 {
        let n = total_docs as f32;
        let df = df as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score one term occurrence in a field of length `field_len`
    pub fn score(&self, tf: f32, idf: f32, field_len: u32, avg_field_len: f32) -> f32 {
        if tf <= 0.0 {
            return 0.0;
        }
        let norm = if avg_field_len > 0.0 {
            1.0 - self.b + self.b * (field_len as f32 / avg_field_len)
        } else {
            1.0
        };
        let tf_component = (tf * (self.k1 + 1.0)) / (tf + self.k1 * norm);
        idf * (tf_component + self.delta)
    }
}

/// Per-document token counts of one field
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldLengths {
    lengths: Vec<u32>,
    total: u64,
}

impl FieldLengths {
    fn with_len(doc_count: usize) -> Self {
        Self {
            lengths: vec![0; doc_count],
            total: 0,
        }
    }

    fn push(&mut self, len: u32) {
        self.lengths.push(len);
        self.total += len as u64;
    }

    pub fn get(&self, docno: DocNo) -> u32 {
        self.lengths.get(docno.as_usize()).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Statistics for a single segment (or the mutable buffer)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentStatistics {
    /// Total number of documents, including tombstoned ones
    pub doc_count: u32,
    fields: BTreeMap<String, FieldLengths>,
}

impl SegmentStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the field lengths of the next document and return its docno
    ///
    /// Fields the document does not have get length 0.
    pub fn add_document(&mut self, field_lengths: &HashMap<String, u32>) -> DocNo {
        let docno = DocNo::new(self.doc_count);
        let doc_count = self.doc_count as usize;

        for name in field_lengths.keys() {
            if !self.fields.contains_key(name) {
                self.fields
                    .insert(name.clone(), FieldLengths::with_len(doc_count));
            }
        }
        for (name, lengths) in self.fields.iter_mut() {
            lengths.push(field_lengths.get(name).copied().unwrap_or(0));
        }

        self.doc_count += 1;
        docno
    }

    pub fn field_length(&self, field: &str, docno: DocNo) -> u32 {
        self.fields.get(field).map(|f| f.get(docno)).unwrap_or(0)
    }

    /// Sum of all lengths of `field` in this segment
    pub fn total_field_length(&self, field: &str) -> u64 {
        self.fields.get(field).map(|f| f.total()).unwrap_or(0)
    }

    pub fn field_lengths(&self, field: &str) -> Option<&FieldLengths> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Average length of `field` within this segment
    pub fn avg_field_length(&self, field: &str) -> f32 {
        if self.doc_count == 0 {
            return 0.0;
        }
        self.total_field_length(field) as f32 / self.doc_count as f32
    }
}

/// Index-wide statistics aggregated over the segments of a snapshot
#[derive(Clone, Debug, Default)]
pub struct IndexStatistics {
    /// Documents across all segments (tombstoned ones included)
    pub total_docs: u64,
    field_totals: HashMap<String, u64>,
}

impl IndexStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate statistics from multiple segments
    pub fn aggregate<'a>(segments: impl IntoIterator<Item = &'a SegmentStatistics>) -> Self {
        let mut stats = Self::new();
        for segment in segments {
            stats.total_docs += segment.doc_count as u64;
            for (field, lengths) in &segment.fields {
                *stats.field_totals.entry(field.clone()).or_insert(0) += lengths.total();
            }
        }
        stats
    }

    pub fn avg_field_length(&self, field: &str) -> f32 {
        if self.total_docs == 0 {
            return 0.0;
        }
        let total = self.field_totals.get(field).copied().unwrap_or(0);
        total as f32 / self.total_docs as f32
    }
}
