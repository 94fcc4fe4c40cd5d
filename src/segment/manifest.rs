//! Commit manifest: the list of segments and tombstones of one generation
//!
//! Manifest atomicity:
//! 1. Write new segment files and the tombstone file → fsync
//! 2. Write `segments_<gen>.tmp` → fsync
//! 3. Atomic rename to `segments_<gen>` → fsync directory
//! 4. Only then publish the new snapshot to readers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::reader::SegmentMeta;
use super::types::{DocumentId, Generation, SegmentId};
use crate::error::{QuarryError, Result};
use crate::models::current_timestamp;

const MANIFEST_PREFIX: &str = "segments_";
const TOMBSTONES_PREFIX: &str = "tombstones_";

/// File name of the manifest of `generation`
pub fn manifest_file_name(generation: Generation) -> String {
    format!("{}{}", MANIFEST_PREFIX, generation)
}

/// File name of the tombstone file written with `generation`
pub fn tombstones_file_name(generation: Generation) -> String {
    format!("{}{}.bin", TOMBSTONES_PREFIX, generation)
}

/// Generation of a manifest file name (`segments_<gen>`)
pub fn parse_manifest_name(name: &str) -> Option<Generation> {
    name.strip_prefix(MANIFEST_PREFIX)?.parse().ok()
}

/// Manifest entry for a segment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub meta: SegmentMeta,
    /// CRC32 of every segment file, keyed by file name
    pub checksums: BTreeMap<String, u32>,
}

/// Reference to the tombstone file of a generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TombstoneRef {
    pub file: String,
    pub checksum: u32,
    /// Total tombstoned documents across segments
    pub deleted_docs: u64,
}

/// The manifest of one committed generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Manifest format version
    pub version: u32,
    pub generation: Generation,
    /// Next segment ID to allocate
    pub next_segment_id: SegmentId,
    /// Next document ID to assign
    pub next_doc_id: DocumentId,
    pub segments: Vec<ManifestEntry>,
    pub tombstones: Option<TombstoneRef>,
    /// Timestamp of the commit (ms)
    pub updated_at: u64,
}

impl Default for IndexManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexManifest {
    /// Current manifest format version
    pub const VERSION: u32 = 1;

    /// Manifest of an empty index (generation 0)
    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            generation: 0,
            next_segment_id: SegmentId::new(0),
            next_doc_id: 0,
            segments: Vec::new(),
            tombstones: None,
            updated_at: 0,
        }
    }

    /// Successor manifest with the same allocators and no segments
    pub fn next_generation(&self) -> Self {
        Self {
            version: Self::VERSION,
            generation: self.generation + 1,
            next_segment_id: self.next_segment_id,
            next_doc_id: self.next_doc_id,
            segments: Vec::new(),
            tombstones: None,
            updated_at: current_timestamp(),
        }
    }

    /// Allocate a new segment ID
    pub fn allocate_segment_id(&mut self) -> SegmentId {
        let id = self.next_segment_id;
        self.next_segment_id = id.next();
        id
    }

    pub fn total_doc_count(&self) -> u64 {
        self.segments.iter().map(|e| e.meta.doc_count as u64).sum()
    }

    pub fn deleted_doc_count(&self) -> u64 {
        self.tombstones.as_ref().map(|t| t.deleted_docs).unwrap_or(0)
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.segments.iter().map(|e| e.meta.size_bytes).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get_segment(&self, segment_id: SegmentId) -> Option<&ManifestEntry> {
        self.segments.iter().find(|e| e.meta.id == segment_id)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse a manifest; any malformed content is reported as corruption
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let manifest: IndexManifest = serde_json::from_slice(data)
            .map_err(|e| QuarryError::corrupt(format!("unreadable manifest: {}", e)))?;
        if manifest.version > Self::VERSION {
            return Err(QuarryError::corrupt(format!(
                "unsupported manifest version {}",
                manifest.version
            )));
        }
        Ok(manifest)
    }
}
