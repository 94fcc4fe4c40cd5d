//! Term dictionary using FST (Finite State Transducer)
//!
//! Keys are `field ++ 0x00 ++ token`, values index into a parallel array of
//! posting list metadata. FST provides O(|key|) lookups and the sorted key
//! order gives each field a contiguous range for fuzzy expansion.

use std::io;

use fst::{IntoStreamer, Map, MapBuilder, Streamer};

use super::types::{field_key_range, split_term_key, term_key, PostingListMeta};

/// Term dictionary backed by FST
pub struct TermDictionary {
    /// FST mapping term key -> index in metadata array
    fst: Map<Vec<u8>>,
    /// Metadata for each term (parallel to FST output values)
    metadata: Vec<PostingListMeta>,
}

impl TermDictionary {
    /// Create a term dictionary from FST data and metadata
    pub fn new(fst_data: Vec<u8>, metadata: Vec<PostingListMeta>) -> io::Result<Self> {
        let fst = Map::new(fst_data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if fst.len() != metadata.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "term dictionary has {} keys but {} metadata entries",
                    fst.len(),
                    metadata.len()
                ),
            ));
        }
        Ok(Self { fst, metadata })
    }

    /// Look up a term key and return its postings metadata
    pub fn get_key(&self, key: &[u8]) -> Option<&PostingListMeta> {
        self.fst
            .get(key)
            .and_then(|idx| self.metadata.get(idx as usize))
    }

    pub fn get(&self, field: &str, token: &str) -> Option<&PostingListMeta> {
        self.get_key(&term_key(field, token))
    }

    pub fn contains(&self, field: &str, token: &str) -> bool {
        self.fst.contains_key(term_key(field, token))
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// All tokens of `field`, in lexicographic order
    pub fn field_terms(&self, field: &str) -> Vec<String> {
        let (lower, upper) = field_key_range(field);
        let mut stream = self.fst.range().ge(&lower).lt(&upper).into_stream();

        let mut tokens = Vec::new();
        while let Some((key, _)) = stream.next() {
            if let Some((_, token)) = split_term_key(key) {
                tokens.push(token.to_string());
            }
        }
        tokens
    }

    /// Get the raw FST data (for serialization)
    pub fn fst_bytes(&self) -> &[u8] {
        self.fst.as_fst().as_bytes()
    }

    /// Get the metadata array (for serialization)
    pub fn metadata(&self) -> &[PostingListMeta] {
        &self.metadata
    }

    /// Every term key with its metadata, in key order
    pub fn iter_terms(&self) -> Vec<(Vec<u8>, &PostingListMeta)> {
        let mut results = Vec::with_capacity(self.metadata.len());
        let mut stream = self.fst.stream();
        while let Some((key, idx)) = stream.next() {
            if let Some(meta) = self.metadata.get(idx as usize) {
                results.push((key.to_vec(), meta));
            }
        }
        results
    }
}

/// Builder for term dictionaries
pub struct TermDictionaryBuilder {
    terms: Vec<(Vec<u8>, PostingListMeta)>,
}

impl TermDictionaryBuilder {
    pub fn new() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            terms: Vec::with_capacity(capacity),
        }
    }

    /// Add a term key with its postings metadata
    pub fn add(&mut self, key: Vec<u8>, meta: PostingListMeta) {
        self.terms.push((key, meta));
    }

    pub fn build(mut self) -> io::Result<TermDictionary> {
        // FST requires sorted input
        self.terms.sort_by(|a, b| a.0.cmp(&b.0));

        let mut fst_builder = MapBuilder::memory();
        let mut metadata = Vec::with_capacity(self.terms.len());

        for (idx, (key, meta)) in self.terms.into_iter().enumerate() {
            fst_builder
                .insert(&key, idx as u64)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            metadata.push(meta);
        }

        let fst_data = fst_builder.into_inner().map_err(io::Error::other)?;

        TermDictionary::new(fst_data, metadata)
    }
}

impl Default for TermDictionaryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
