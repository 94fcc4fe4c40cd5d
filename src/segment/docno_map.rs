//! Dense document number mapping
//!
//! Each segment numbers its documents `0..doc_count` and keeps the external
//! id of every docno. Ids are appended in increasing order, so the reverse
//! lookup is a binary search and merged segments stay sorted by id.

use std::io;

use roaring::RoaringBitmap;

use super::postings::{decode_vbyte, encode_vbyte, read_u64_le};
use super::types::{DocNo, DocumentId};

/// Docno to document id mapping for a segment
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocNoMap {
    /// Dense array: docno -> doc_id, strictly increasing
    doc_ids: Vec<DocumentId>,
}

impl DocNoMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            doc_ids: Vec::with_capacity(capacity),
        }
    }

    /// Add a new document and return its docno
    ///
    /// Ids must be added in increasing order.
    pub fn add(&mut self, doc_id: DocumentId) -> DocNo {
        debug_assert!(self.doc_ids.last().map_or(true, |&last| last < doc_id));
        let docno = DocNo::new(self.doc_ids.len() as u32);
        self.doc_ids.push(doc_id);
        docno
    }

    pub fn get_doc_id(&self, docno: DocNo) -> Option<DocumentId> {
        self.doc_ids.get(docno.as_usize()).copied()
    }

    /// Find the docno holding `doc_id`
    pub fn find_docno(&self, doc_id: DocumentId) -> Option<DocNo> {
        self.doc_ids
            .binary_search(&doc_id)
            .ok()
            .map(|idx| DocNo::new(idx as u32))
    }

    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn min_doc_id(&self) -> Option<DocumentId> {
        self.doc_ids.first().copied()
    }

    pub fn max_doc_id(&self) -> Option<DocumentId> {
        self.doc_ids.last().copied()
    }

    pub fn doc_ids(&self) -> &[DocumentId] {
        &self.doc_ids
    }

    /// Serialize to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(5 + self.doc_ids.len() * 8);
        encode_vbyte(self.doc_ids.len() as u32, &mut output);
        for doc_id in &self.doc_ids {
            output.extend_from_slice(&doc_id.to_le_bytes());
        }
        output
    }

    /// Deserialize from bytes
    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let mut pos = 0;
        let count = decode_vbyte(data, &mut pos)? as usize;

        let mut doc_ids = Vec::with_capacity(count);
        for _ in 0..count {
            let doc_id = read_u64_le(data, &mut pos)?;
            if doc_ids.last().is_some_and(|&last| last >= doc_id) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "docno map ids are not strictly increasing",
                ));
            }
            doc_ids.push(doc_id);
        }

        Ok(Self { doc_ids })
    }
}

/// Merge the live documents of several segments into one id-ordered map
///
/// Returns the merged map and, for each input, a remap table from old docno
/// to new docno (`DocNo::MAX` for dropped documents). Inputs may overlap in
/// id ranges; the merge is a linear k-way merge by document id.
pub fn merge_docno_maps(inputs: &[(&DocNoMap, &RoaringBitmap)]) -> (DocNoMap, Vec<Vec<DocNo>>) {
    let live_total: usize = inputs
        .iter()
        .map(|(map, deleted)| map.len().saturating_sub(deleted.len() as usize))
        .sum();
    let mut merged = DocNoMap::with_capacity(live_total);
    let mut remaps: Vec<Vec<DocNo>> = inputs
        .iter()
        .map(|(map, _)| vec![DocNo::MAX; map.len()])
        .collect();
    let mut cursors = vec![0usize; inputs.len()];

    loop {
        // Pick the input whose next live document has the smallest id
        let mut best: Option<(usize, DocumentId)> = None;
        for (i, (map, deleted)) in inputs.iter().enumerate() {
            while cursors[i] < map.len() && deleted.contains(cursors[i] as u32) {
                cursors[i] += 1;
            }
            if let Some(&doc_id) = map.doc_ids.get(cursors[i]) {
                if best.map_or(true, |(_, id)| doc_id < id) {
                    best = Some((i, doc_id));
                }
            }
        }

        let Some((i, doc_id)) = best else { break };
        remaps[i][cursors[i]] = merged.add(doc_id);
        cursors[i] += 1;
    }

    (merged, remaps)
}
