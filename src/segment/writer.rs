//! Segment writer for creating new immutable segments
//!
//! Two producers: flushing the mutable buffer and merging existing
//! segments. Both emit the same set of files, and the in-memory reader is
//! opened from those exact bytes so a fresh segment and a reloaded one
//! behave identically.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use crc32fast::Hasher;
use tracing::debug;

use super::buffer::MutableBuffer;
use super::docno_map::{merge_docno_maps, DocNoMap};
use super::merge::CancellationToken;
use super::postings::PostingsWriter;
use super::reader::{SegmentMeta, SegmentReader, SegmentReaderBuilder, SegmentView};
use super::statistics::SegmentStatistics;
use super::stored::StoredFieldsWriter;
use super::term_dict::TermDictionaryBuilder;
use super::types::{DocNo, Posting, PostingListMeta, SegmentId};
use crate::error::{QuarryError, Result};
use crate::models::current_timestamp;

pub const POSTINGS_FILE: &str = "postings.bin";
pub const TERMS_FILE: &str = "terms.fst";
pub const TERM_META_FILE: &str = "term_meta.bin";
pub const DOCNO_MAP_FILE: &str = "docno_map.bin";
pub const STATS_FILE: &str = "stats.bin";
pub const STORE_FILE: &str = "store.bin";

/// Every file of a segment, in a fixed order
pub const SEGMENT_FILES: [&str; 6] = [
    POSTINGS_FILE,
    TERMS_FILE,
    TERM_META_FILE,
    DOCNO_MAP_FILE,
    STATS_FILE,
    STORE_FILE,
];

pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Serialized contents of a segment's files
#[derive(Clone, Debug, Default)]
pub struct SegmentFiles {
    pub postings: Vec<u8>,
    pub terms: Vec<u8>,
    pub term_meta: Vec<u8>,
    pub docno_map: Vec<u8>,
    pub stats: Vec<u8>,
    pub store: Vec<u8>,
}

impl SegmentFiles {
    /// (file name, contents) pairs
    pub fn entries(&self) -> [(&'static str, &[u8]); 6] {
        [
            (POSTINGS_FILE, &self.postings),
            (TERMS_FILE, &self.terms),
            (TERM_META_FILE, &self.term_meta),
            (DOCNO_MAP_FILE, &self.docno_map),
            (STATS_FILE, &self.stats),
            (STORE_FILE, &self.store),
        ]
    }

    /// Assemble from (file name, contents) pairs, e.g. as read from disk
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Vec<u8>)>) -> Result<Self> {
        let mut files = SegmentFiles::default();
        for (name, data) in entries {
            match name.as_str() {
                POSTINGS_FILE => files.postings = data,
                TERMS_FILE => files.terms = data,
                TERM_META_FILE => files.term_meta = data,
                DOCNO_MAP_FILE => files.docno_map = data,
                STATS_FILE => files.stats = data,
                STORE_FILE => files.store = data,
                other => {
                    return Err(QuarryError::corrupt(format!(
                        "unknown segment file {}",
                        other
                    )))
                }
            }
        }
        Ok(files)
    }

    /// CRC32 of every file, keyed by file name
    pub fn checksums(&self) -> BTreeMap<String, u32> {
        self.entries()
            .iter()
            .map(|(name, data)| (name.to_string(), crc32(data)))
            .collect()
    }

    pub fn size_bytes(&self) -> u64 {
        self.entries().iter().map(|(_, data)| data.len() as u64).sum()
    }

    /// Decode the files into a reader
    pub fn open_reader(&self, meta: SegmentMeta) -> Result<SegmentReader> {
        let term_meta: Vec<PostingListMeta> = bincode::deserialize(&self.term_meta)?;
        let stats: SegmentStatistics = bincode::deserialize(&self.stats)?;
        let docno_map = DocNoMap::deserialize(&self.docno_map)?;

        if docno_map.len() != meta.doc_count as usize || stats.doc_count != meta.doc_count {
            return Err(QuarryError::corrupt(format!(
                "{}: expected {} documents, docno map has {}, statistics have {}",
                meta.id,
                meta.doc_count,
                docno_map.len(),
                stats.doc_count
            )));
        }

        SegmentReaderBuilder::new()
            .with_meta(meta)
            .with_terms(self.terms.clone(), term_meta)
            .with_postings(self.postings.clone())
            .with_stored(self.store.clone())
            .with_stats(stats)
            .with_docno_map(docno_map)
            .build()
    }
}

/// Result of writing a segment
pub struct SegmentWriteResult {
    pub reader: SegmentReader,
    pub files: SegmentFiles,
}

impl SegmentWriteResult {
    pub fn meta(&self) -> &SegmentMeta {
        self.reader.meta()
    }
}

/// Writer for creating new segments from a buffer or from a merge
pub struct SegmentWriter {
    segment_id: SegmentId,
}

impl SegmentWriter {
    pub fn new(segment_id: SegmentId) -> Self {
        Self { segment_id }
    }

    /// Write the live documents of a buffer as a segment
    ///
    /// Deleted buffer documents are dropped and the rest renumbered.
    /// Returns `None` when nothing in the buffer is live.
    pub fn write_from_buffer(&self, buffer: &MutableBuffer) -> Result<Option<SegmentWriteResult>> {
        let doc_count = buffer.doc_count();
        let mut remap = vec![DocNo::MAX; doc_count as usize];
        let mut docno_map = DocNoMap::with_capacity(buffer.live_doc_count() as usize);
        let mut stats = SegmentStatistics::new();
        let mut stored = StoredFieldsWriter::new();

        for old in 0..doc_count {
            let old_docno = DocNo::new(old);
            if buffer.is_deleted(old_docno) {
                continue;
            }
            let (Some(doc_id), Some(fields)) =
                (buffer.doc_id(old_docno), buffer.stored_fields(old_docno))
            else {
                continue;
            };

            let new_docno = docno_map.add(doc_id);
            stats.add_document(&field_lengths_of(buffer.stats(), old_docno));
            stored.add(fields)?;
            remap[old as usize] = new_docno;
        }

        if docno_map.is_empty() {
            return Ok(None);
        }

        let mut postings_writer = PostingsWriter::new();
        let mut term_builder = TermDictionaryBuilder::with_capacity(buffer.term_count());

        for key in buffer.sorted_terms() {
            let Some(postings) = buffer.get_postings(key) else {
                continue;
            };

            let mut live = postings
                .iter()
                .filter(|p| remap[p.docno.as_usize()] != DocNo::MAX)
                .peekable();
            if live.peek().is_none() {
                continue;
            }

            postings_writer.start_posting_list();
            for posting in live {
                postings_writer.add_posting(Posting {
                    docno: remap[posting.docno.as_usize()],
                    term_frequency: posting.term_frequency,
                    positions: posting.positions.clone(),
                });
            }
            term_builder.add(key.to_vec(), postings_writer.finish_posting_list());
        }

        let result = self.finish(postings_writer, term_builder, docno_map, stats, stored)?;
        debug!(
            segment = %self.segment_id,
            docs = result.reader.doc_count(),
            terms = result.reader.term_count(),
            "Flushed buffer to segment"
        );
        Ok(Some(result))
    }

    /// Merge segments into a new one, dropping tombstoned documents
    ///
    /// Term streams are merged linearly in key order; for each term the
    /// remapped posting lists are k-way merged by new docno. The token is
    /// checked between terms and once more before the result is assembled.
    /// Returns `None` when no input document is live.
    pub fn merge_segments(
        &self,
        segments: &[SegmentView],
        cancel: &CancellationToken,
    ) -> Result<Option<SegmentWriteResult>> {
        if segments.is_empty() {
            return Err(QuarryError::InvalidRequest(
                "No segments to merge".to_string(),
            ));
        }

        let inputs: Vec<(&DocNoMap, &roaring::RoaringBitmap)> = segments
            .iter()
            .map(|s| (s.reader.docno_map(), s.deletes.as_ref()))
            .collect();
        let (docno_map, remaps) = merge_docno_maps(&inputs);

        if docno_map.is_empty() {
            return Ok(None);
        }

        // New docno -> (input segment, old docno)
        let mut sources = vec![(0usize, DocNo::MAX); docno_map.len()];
        for (seg_idx, remap) in remaps.iter().enumerate() {
            for (old, &new) in remap.iter().enumerate() {
                if new != DocNo::MAX {
                    sources[new.as_usize()] = (seg_idx, DocNo::new(old as u32));
                }
            }
        }

        let mut stats = SegmentStatistics::new();
        let mut stored = StoredFieldsWriter::new();
        for &(seg_idx, old_docno) in &sources {
            let reader = &segments[seg_idx].reader;
            stats.add_document(&field_lengths_of(reader.stats(), old_docno));
            stored.add(&reader.stored().get_fields(old_docno)?)?;
        }

        let term_lists: Vec<Vec<(Vec<u8>, &PostingListMeta)>> = segments
            .iter()
            .map(|s| s.reader.terms().iter_terms())
            .collect();
        let mut heap: BinaryHeap<Reverse<(&[u8], usize, usize)>> = BinaryHeap::new();
        for (seg_idx, terms) in term_lists.iter().enumerate() {
            if let Some((key, _)) = terms.first() {
                heap.push(Reverse((key.as_slice(), seg_idx, 0)));
            }
        }

        let mut postings_writer = PostingsWriter::new();
        let mut term_builder = TermDictionaryBuilder::new();

        while let Some(Reverse((key, seg_idx, idx))) = heap.pop() {
            cancel.check()?;

            // Every segment holding this key
            let mut holders = vec![(seg_idx, idx)];
            while let Some(Reverse((next_key, _, _))) = heap.peek() {
                if *next_key != key {
                    break;
                }
                if let Some(Reverse((_, s, i))) = heap.pop() {
                    holders.push((s, i));
                }
            }

            let mut lists = Vec::with_capacity(holders.len());
            for &(s, i) in &holders {
                let meta = term_lists[s][i].1;
                let postings = segments[s].reader.postings_for(meta)?.read_all()?;
                let remapped: Vec<Posting> = postings
                    .into_iter()
                    .filter_map(|p| {
                        let docno = remaps[s][p.docno.as_usize()];
                        (docno != DocNo::MAX).then_some(Posting { docno, ..p })
                    })
                    .collect();
                if !remapped.is_empty() {
                    lists.push(remapped);
                }

                if let Some((next_key, _)) = term_lists[s].get(i + 1) {
                    heap.push(Reverse((next_key.as_slice(), s, i + 1)));
                }
            }

            if lists.is_empty() {
                continue;
            }

            postings_writer.start_posting_list();
            for posting in kway_merge_postings(lists) {
                postings_writer.add_posting(posting);
            }
            term_builder.add(key.to_vec(), postings_writer.finish_posting_list());
        }

        cancel.check()?;

        let result = self.finish(postings_writer, term_builder, docno_map, stats, stored)?;
        debug!(
            segment = %self.segment_id,
            inputs = segments.len(),
            docs = result.reader.doc_count(),
            "Merged segments"
        );
        Ok(Some(result))
    }

    fn finish(
        &self,
        postings_writer: PostingsWriter,
        term_builder: TermDictionaryBuilder,
        docno_map: DocNoMap,
        stats: SegmentStatistics,
        stored: StoredFieldsWriter,
    ) -> Result<SegmentWriteResult> {
        let term_dict = term_builder.build()?;

        let files = SegmentFiles {
            postings: postings_writer.into_data(),
            terms: term_dict.fst_bytes().to_vec(),
            term_meta: bincode::serialize(term_dict.metadata())?,
            docno_map: docno_map.serialize(),
            stats: bincode::serialize(&stats)?,
            store: stored.finish(),
        };

        let meta = SegmentMeta {
            id: self.segment_id,
            doc_count: docno_map.len() as u32,
            min_doc_id: docno_map.min_doc_id().unwrap_or(0),
            max_doc_id: docno_map.max_doc_id().unwrap_or(0),
            size_bytes: files.size_bytes(),
            created_at: current_timestamp(),
        };

        let reader = files.open_reader(meta)?;
        Ok(SegmentWriteResult { reader, files })
    }
}

fn field_lengths_of(stats: &SegmentStatistics, docno: DocNo) -> HashMap<String, u32> {
    stats
        .fields()
        .map(|field| (field.to_string(), stats.field_length(field, docno)))
        .filter(|(_, len)| *len > 0)
        .collect()
}

/// Merge posting lists that are each sorted by docno
fn kway_merge_postings(lists: Vec<Vec<Posting>>) -> Vec<Posting> {
    if lists.len() == 1 {
        return lists.into_iter().flatten().collect();
    }

    let total = lists.iter().map(Vec::len).sum();
    let mut merged = Vec::with_capacity(total);
    let mut iters: Vec<std::vec::IntoIter<Posting>> = lists.into_iter().map(Vec::into_iter).collect();
    let mut heads: Vec<Option<Posting>> = iters.iter_mut().map(Iterator::next).collect();

    let mut heap: BinaryHeap<Reverse<(DocNo, usize)>> = heads
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.as_ref().map(|p| Reverse((p.docno, i))))
        .collect();

    while let Some(Reverse((_, i))) = heap.pop() {
        if let Some(posting) = heads[i].take() {
            merged.push(posting);
        }
        heads[i] = iters[i].next();
        if let Some(next) = &heads[i] {
            heap.push(Reverse((next.docno, i)));
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use crate::segment::buffer::{AnalyzedDocument, AnalyzedField};
    use roaring::RoaringBitmap;
    use std::sync::Arc;

    fn analyzed(text: &str) -> AnalyzedDocument {
        let mut terms: HashMap<String, Vec<u32>> = HashMap::new();
        let tokens: Vec<&str> = text.split_whitespace().collect();
        for (pos, token) in tokens.iter().enumerate() {
            terms.entry(token.to_string()).or_default().push(pos as u32);
        }
        AnalyzedDocument {
            fields: vec![AnalyzedField {
                name: "body".to_string(),
                length: tokens.len() as u32,
                terms,
            }],
            stored: vec![FieldValue::new("body", text)],
        }
    }

    fn segment(id: u64, docs: &[(u64, &str)]) -> SegmentView {
        let mut buffer = MutableBuffer::new();
        for (doc_id, text) in docs {
            buffer.index_document(*doc_id, analyzed(text));
        }
        let result = SegmentWriter::new(SegmentId::new(id))
            .write_from_buffer(&buffer)
            .unwrap()
            .unwrap();
        SegmentView::new(Arc::new(result.reader), Arc::new(RoaringBitmap::new()))
    }

    fn docs_for(view: &SegmentView, token: &str) -> Vec<u64> {
        match view.reader.get_postings("body", token).unwrap() {
            Some(iter) => iter
                .read_all()
                .unwrap()
                .into_iter()
                .filter_map(|p| view.reader.get_doc_id(p.docno))
                .collect(),
            None => Vec::new(),
        }
    }

    #[test]
    fn test_write_from_buffer_skips_deleted() {
        let mut buffer = MutableBuffer::new();
        buffer.index_document(0, analyzed("the quick fox"));
        buffer.index_document(1, analyzed("the lazy dog"));
        buffer.index_document(2, analyzed("quick quick dog"));
        buffer.delete_document(1);

        let result = SegmentWriter::new(SegmentId::new(1))
            .write_from_buffer(&buffer)
            .unwrap()
            .unwrap();
        let reader = &result.reader;

        assert_eq!(reader.doc_count(), 2);
        assert_eq!(reader.get_doc_id(DocNo(1)), Some(2));
        assert!(reader.get_posting_meta("body", "lazy").is_none());
        assert_eq!(reader.doc_frequency("body", "dog"), 1);
        assert_eq!(reader.field_length("body", DocNo(1)), 3);
        assert_eq!(
            reader.stored_document(DocNo(1)).unwrap().get("body"),
            Some("quick quick dog")
        );
        assert_eq!(result.meta().min_doc_id, 0);
        assert_eq!(result.meta().max_doc_id, 2);
        assert_eq!(result.meta().size_bytes, result.files.size_bytes());
    }

    #[test]
    fn test_all_deleted_buffer_writes_nothing() {
        let mut buffer = MutableBuffer::new();
        buffer.index_document(0, analyzed("gone"));
        buffer.delete_document(0);

        assert!(SegmentWriter::new(SegmentId::new(1))
            .write_from_buffer(&buffer)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_files_reopen_identically() {
        let view = segment(3, &[(5, "alpha beta"), (9, "beta gamma")]);
        let mut buffer = MutableBuffer::new();
        buffer.index_document(5, analyzed("alpha beta"));
        buffer.index_document(9, analyzed("beta gamma"));
        let result = SegmentWriter::new(SegmentId::new(3))
            .write_from_buffer(&buffer)
            .unwrap()
            .unwrap();

        let reopened = result.files.open_reader(result.meta().clone()).unwrap();
        assert_eq!(reopened.term_count(), view.reader.term_count());
        assert_eq!(reopened.find_docno(9), Some(DocNo(1)));
        assert_eq!(result.files.checksums().len(), SEGMENT_FILES.len());
    }

    #[test]
    fn test_merge_interleaved_segments() {
        let a = segment(1, &[(0, "red fish"), (3, "blue fish"), (4, "red")]);
        let b = segment(2, &[(1, "one fish"), (2, "two fish red")]);
        let a = a.with_deleted([DocNo(1)]); // doc 3

        let merged = SegmentWriter::new(SegmentId::new(3))
            .merge_segments(&[a, b], &CancellationToken::new())
            .unwrap()
            .unwrap();
        let view = SegmentView::new(Arc::new(merged.reader), Arc::new(RoaringBitmap::new()));

        assert_eq!(view.reader.docno_map().doc_ids(), &[0, 1, 2, 4]);
        assert_eq!(docs_for(&view, "fish"), vec![0, 1, 2]);
        assert_eq!(docs_for(&view, "red"), vec![0, 2, 4]);
        assert!(docs_for(&view, "blue").is_empty());
        assert_eq!(
            view.reader
                .stored_document(view.reader.find_docno(2).unwrap())
                .unwrap()
                .get("body"),
            Some("two fish red")
        );

        let red = view
            .reader
            .get_postings("body", "red")
            .unwrap()
            .unwrap()
            .read_all()
            .unwrap();
        assert_eq!(red[1].positions, vec![2]);
    }

    #[test]
    fn test_merge_of_fully_deleted_segments() {
        let a = segment(1, &[(0, "x")]).with_deleted([DocNo(0)]);
        let merged = SegmentWriter::new(SegmentId::new(2))
            .merge_segments(&[a], &CancellationToken::new())
            .unwrap();
        assert!(merged.is_none());
    }

    #[test]
    fn test_cancelled_merge() {
        let a = segment(1, &[(0, "x y")]);
        let b = segment(2, &[(1, "y z")]);
        let token = CancellationToken::new();
        token.cancel();

        let result = SegmentWriter::new(SegmentId::new(3)).merge_segments(&[a, b], &token);
        assert!(matches!(result, Err(QuarryError::Cancelled)));
    }

    #[test]
    fn test_kway_merge_postings() {
        let merged = kway_merge_postings(vec![
            vec![Posting::new(DocNo(0), 1), Posting::new(DocNo(5), 1)],
            vec![Posting::new(DocNo(2), 2)],
            vec![Posting::new(DocNo(1), 1), Posting::new(DocNo(9), 3)],
        ]);
        let docnos: Vec<u32> = merged.iter().map(|p| p.docno.0).collect();
        assert_eq!(docnos, vec![0, 1, 2, 5, 9]);
    }
}
