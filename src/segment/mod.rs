//! Segment-based inverted index storage
//!
//! Immutable segment files plus a mutable buffer for recent writes.
//!
//! # Architecture
//!
//! - `MutableBuffer`: in-memory buffer for documents not yet flushed
//! - `SegmentWriter`: flushes a buffer or merges segments into a new segment
//! - `SegmentReader`: immutable segment (postings, FST terms, stored fields)
//! - `SegmentView`: a reader plus the tombstones of one generation
//! - `IndexManifest` / `SegmentStore`: atomic generations on disk

mod types;
mod statistics;
mod buffer;
mod postings;
mod term_dict;
mod docno_map;
mod stored;
mod tombstones;
mod reader;
mod writer;
mod manifest;
mod merge;
mod store;

pub use types::*;
pub use statistics::*;
pub use buffer::*;
pub use postings::{PostingIterator, PostingsReader, PostingsWriter, SkipEntry};
pub use term_dict::*;
pub use docno_map::*;
pub use stored::*;
pub use tombstones::*;
pub use reader::*;
pub use writer::*;
pub use manifest::*;
pub use merge::*;
pub use store::*;
