//! Postings format with block-based compression
//!
//! Each posting list is a sequence of blocks of up to 128 documents:
//! - docno deltas: bitpacked
//! - term frequencies: bitpacked
//! - positions: vbyte deltas, one run per document
//!
//! A skip entry per block (max docno, block offset, max tf) precedes the
//! blocks so cursors can jump over whole blocks during intersections.

use std::io;

use super::types::{DocNo, Posting, PostingBlock, PostingListMeta};

/// Variable-byte encoding for integers
pub fn encode_vbyte(value: u32, output: &mut Vec<u8>) {
    let mut v = value;
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            output.push(byte | 0x80); // Set high bit to indicate last byte
            break;
        } else {
            output.push(byte);
        }
    }
}

/// Decode a variable-byte encoded integer
pub fn decode_vbyte(input: &[u8], pos: &mut usize) -> io::Result<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;

    loop {
        if *pos >= input.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Unexpected end of vbyte",
            ));
        }

        let byte = input[*pos];
        *pos += 1;

        result |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 != 0 {
            return Ok(result);
        }

        shift += 7;
        if shift > 28 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "VByte value too large",
            ));
        }
    }
}

pub(crate) fn read_u64_le(input: &[u8], pos: &mut usize) -> io::Result<u64> {
    let end = *pos + 8;
    let bytes: [u8; 8] = input
        .get(*pos..end)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Unexpected end of u64"))?;
    *pos = end;
    Ok(u64::from_le_bytes(bytes))
}

/// Simple bitpacking for a block of integers
/// Uses the minimum number of bits needed to represent the max value
pub fn bitpack_encode(values: &[u32], output: &mut Vec<u8>) {
    let max_val = values.iter().copied().max().unwrap_or(0);
    if values.is_empty() || max_val == 0 {
        output.push(0); // 0 bits needed
        return;
    }

    let bits_needed = (32 - max_val.leading_zeros()) as u8;
    output.push(bits_needed);

    let mut current: u64 = 0;
    let mut bits_in_current = 0;

    for &value in values {
        current |= (value as u64) << bits_in_current;
        bits_in_current += bits_needed as u32;

        while bits_in_current >= 8 {
            output.push(current as u8);
            current >>= 8;
            bits_in_current -= 8;
        }
    }

    if bits_in_current > 0 {
        output.push(current as u8);
    }
}

/// Decode bitpacked integers
pub fn bitpack_decode(input: &[u8], pos: &mut usize, count: usize) -> io::Result<Vec<u32>> {
    if *pos >= input.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "Unexpected end of bitpack",
        ));
    }

    let bits_needed = input[*pos] as u32;
    *pos += 1;

    if bits_needed == 0 {
        return Ok(vec![0; count]);
    }
    if bits_needed > 32 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Bitpack width out of range",
        ));
    }

    let total_bits = count as u64 * bits_needed as u64;
    let bytes_needed = total_bits.div_ceil(8) as usize;

    if *pos + bytes_needed > input.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "Not enough bytes for bitpack",
        ));
    }

    let mut values = Vec::with_capacity(count);
    let mut current: u64 = 0;
    let mut bits_available = 0;
    let mask = (1u64 << bits_needed) - 1;

    for _ in 0..count {
        while bits_available < bits_needed {
            current |= (input[*pos] as u64) << bits_available;
            *pos += 1;
            bits_available += 8;
        }

        values.push((current & mask) as u32);
        current >>= bits_needed;
        bits_available -= bits_needed;
    }

    Ok(values)
}

/// Skip data for fast block skipping during query processing
#[derive(Clone, Debug, Default)]
pub struct SkipEntry {
    /// Maximum docno in this block
    pub max_docno: DocNo,
    /// Offset to this block, relative to the first block
    pub block_offset: u64,
    /// Largest term frequency in the block
    pub max_tf: u32,
}

/// Writer for posting lists
pub struct PostingsWriter {
    /// Accumulated blocks for current posting list
    block_data: Vec<u8>,
    /// Skip entries for the current term
    skip_entries: Vec<SkipEntry>,
    current_block: PostingBlock,
    /// Last docno written to a block of the current list
    last_docno: u32,
    doc_frequency: u32,
    total_term_frequency: u64,
    /// Final output data
    data: Vec<u8>,
}

impl PostingsWriter {
    pub fn new() -> Self {
        Self {
            block_data: Vec::new(),
            skip_entries: Vec::new(),
            current_block: PostingBlock::new(),
            last_docno: 0,
            doc_frequency: 0,
            total_term_frequency: 0,
            data: Vec::new(),
        }
    }

    /// Start writing a new posting list
    pub fn start_posting_list(&mut self) {
        self.block_data.clear();
        self.skip_entries.clear();
        self.current_block = PostingBlock::new();
        self.last_docno = 0;
        self.doc_frequency = 0;
        self.total_term_frequency = 0;
    }

    /// Add a posting to the current list; docnos must be strictly increasing
    pub fn add_posting(&mut self, posting: Posting) {
        self.doc_frequency += 1;
        self.total_term_frequency += posting.term_frequency as u64;
        self.current_block.push(posting);

        if self.current_block.is_full() {
            self.flush_block();
        }
    }

    /// Finish writing a posting list and return metadata
    pub fn finish_posting_list(&mut self) -> PostingListMeta {
        if !self.current_block.is_empty() {
            self.flush_block();
        }

        let offset = self.data.len() as u64;

        encode_vbyte(self.skip_entries.len() as u32, &mut self.data);
        for skip in &self.skip_entries {
            encode_vbyte(skip.max_docno.0, &mut self.data);
            self.data.extend_from_slice(&skip.block_offset.to_le_bytes());
            encode_vbyte(skip.max_tf, &mut self.data);
        }

        self.data.extend_from_slice(&self.block_data);

        let length = self.data.len() as u64 - offset;

        PostingListMeta {
            offset,
            length,
            doc_frequency: self.doc_frequency,
            total_term_frequency: self.total_term_frequency,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the data (consuming the writer)
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn flush_block(&mut self) {
        if self.current_block.is_empty() {
            return;
        }

        let block = std::mem::take(&mut self.current_block);
        self.skip_entries.push(SkipEntry {
            max_docno: block.max_docno,
            block_offset: self.block_data.len() as u64,
            max_tf: block.max_tf,
        });

        encode_vbyte(block.len() as u32, &mut self.block_data);

        // Deltas continue across blocks; the reader restores the base from
        // the previous skip entry when it jumps.
        let mut deltas = Vec::with_capacity(block.len());
        let mut prev = self.last_docno;
        for docno in &block.docnos {
            deltas.push(docno.0 - prev);
            prev = docno.0;
        }
        self.last_docno = prev;
        bitpack_encode(&deltas, &mut self.block_data);
        bitpack_encode(&block.term_frequencies, &mut self.block_data);

        for positions in &block.positions {
            let mut prev = 0u32;
            for &p in positions {
                encode_vbyte(p - prev, &mut self.block_data);
                prev = p;
            }
        }

        self.current_block = PostingBlock::new();
    }
}

impl Default for PostingsWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader for the postings file of one segment
pub struct PostingsReader {
    data: Vec<u8>,
}

impl PostingsReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Get a cursor over the postings of a term
    pub fn get_postings(&self, meta: &PostingListMeta) -> io::Result<PostingIterator<'_>> {
        let start = meta.offset as usize;
        let end = (meta.offset + meta.length) as usize;

        if end > self.data.len() || start > end {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Posting list extends beyond data",
            ));
        }

        PostingIterator::new(&self.data[start..end])
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Cursor over the postings in a posting list
///
/// Starts before the first document; `advance` or `skip_to` positions it.
pub struct PostingIterator<'a> {
    data: &'a [u8],
    /// Position in data where blocks start (after skip entries)
    blocks_start: usize,
    pos: usize,
    skip_entries: Vec<SkipEntry>,
    /// Index of the next block to decode
    next_block_idx: usize,
    docnos: Vec<DocNo>,
    tfs: Vec<u32>,
    positions: Vec<u32>,
    position_starts: Vec<usize>,
    cursor: usize,
    /// Last docno of the previously decoded block (delta base)
    last_docno: u32,
    started: bool,
    exhausted: bool,
}

impl<'a> PostingIterator<'a> {
    pub fn new(data: &'a [u8]) -> io::Result<Self> {
        let mut pos = 0;
        let block_count = decode_vbyte(data, &mut pos)? as usize;

        let mut skip_entries = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let max_docno = decode_vbyte(data, &mut pos)?;
            let block_offset = read_u64_le(data, &mut pos)?;
            let max_tf = decode_vbyte(data, &mut pos)?;
            skip_entries.push(SkipEntry {
                max_docno: DocNo(max_docno),
                block_offset,
                max_tf,
            });
        }

        Ok(Self {
            data,
            blocks_start: pos,
            pos,
            skip_entries,
            next_block_idx: 0,
            docnos: Vec::new(),
            tfs: Vec::new(),
            positions: Vec::new(),
            position_starts: Vec::new(),
            cursor: 0,
            last_docno: 0,
            started: false,
            exhausted: block_count == 0,
        })
    }

    /// Current document, if positioned on one
    pub fn doc(&self) -> Option<DocNo> {
        if !self.started || self.exhausted {
            return None;
        }
        self.docnos.get(self.cursor).copied()
    }

    pub fn term_frequency(&self) -> u32 {
        self.tfs.get(self.cursor).copied().unwrap_or(0)
    }

    /// Positions of the term in the current document
    pub fn positions(&self) -> &[u32] {
        match (
            self.position_starts.get(self.cursor),
            self.position_starts.get(self.cursor + 1),
        ) {
            (Some(&start), Some(&end)) => &self.positions[start..end],
            _ => &[],
        }
    }

    /// Largest term frequency of any block not yet fully consumed
    pub fn max_remaining_tf(&self) -> u32 {
        let from = self.next_block_idx.saturating_sub(1);
        self.skip_entries[from.min(self.skip_entries.len())..]
            .iter()
            .map(|s| s.max_tf)
            .max()
            .unwrap_or(0)
    }

    /// Move to the next document
    pub fn advance(&mut self) -> io::Result<Option<DocNo>> {
        if self.exhausted {
            return Ok(None);
        }
        if self.started {
            self.cursor += 1;
        } else {
            self.started = true;
        }

        while self.cursor >= self.docnos.len() {
            if !self.load_next_block()? {
                self.exhausted = true;
                return Ok(None);
            }
        }
        Ok(Some(self.docnos[self.cursor]))
    }

    /// Skip to the first posting with docno >= target
    pub fn skip_to(&mut self, target: DocNo) -> io::Result<Option<DocNo>> {
        if self.exhausted {
            return Ok(None);
        }
        if let Some(doc) = self.doc() {
            if doc >= target {
                return Ok(Some(doc));
            }
        }

        let in_current_block = self.started
            && self.next_block_idx > 0
            && self.skip_entries[self.next_block_idx - 1].max_docno >= target;

        if !in_current_block {
            let mut idx = self.next_block_idx;
            while idx < self.skip_entries.len() && self.skip_entries[idx].max_docno < target {
                idx += 1;
            }
            if idx >= self.skip_entries.len() {
                self.exhausted = true;
                return Ok(None);
            }
            if idx > self.next_block_idx {
                self.pos = self.blocks_start + self.skip_entries[idx].block_offset as usize;
                self.last_docno = self.skip_entries[idx - 1].max_docno.0;
                self.next_block_idx = idx;
            }
            self.started = true;
            if !self.load_next_block()? {
                self.exhausted = true;
                return Ok(None);
            }
        }

        // The block's max docno is >= target, so the scan stays in bounds
        self.cursor += self.docnos[self.cursor..].partition_point(|d| *d < target);
        Ok(self.docnos.get(self.cursor).copied())
    }

    /// Decode every remaining posting (used by merges)
    pub fn read_all(mut self) -> io::Result<Vec<Posting>> {
        let mut postings = Vec::new();
        while self.advance()?.is_some() {
            postings.push(Posting {
                docno: self.docnos[self.cursor],
                term_frequency: self.term_frequency(),
                positions: self.positions().to_vec(),
            });
        }
        Ok(postings)
    }

    fn load_next_block(&mut self) -> io::Result<bool> {
        if self.next_block_idx >= self.skip_entries.len() {
            return Ok(false);
        }

        let count = decode_vbyte(self.data, &mut self.pos)? as usize;
        let deltas = bitpack_decode(self.data, &mut self.pos, count)?;
        let tfs = bitpack_decode(self.data, &mut self.pos, count)?;

        self.docnos.clear();
        let mut docno = self.last_docno;
        for delta in deltas {
            docno += delta;
            self.docnos.push(DocNo(docno));
        }
        self.last_docno = docno;

        self.positions.clear();
        self.position_starts.clear();
        for &tf in &tfs {
            self.position_starts.push(self.positions.len());
            let mut prev = 0u32;
            for _ in 0..tf {
                prev += decode_vbyte(self.data, &mut self.pos)?;
                self.positions.push(prev);
            }
        }
        self.position_starts.push(self.positions.len());

        self.tfs = tfs;
        self.cursor = 0;
        self.next_block_idx += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_list(postings: Vec<Posting>) -> (PostingsReader, PostingListMeta) {
        let mut writer = PostingsWriter::new();
        writer.start_posting_list();
        for posting in postings {
            writer.add_posting(posting);
        }
        let meta = writer.finish_posting_list();
        (PostingsReader::new(writer.into_data()), meta)
    }

    #[test]
    fn test_vbyte_encoding() {
        let mut output = Vec::new();

        encode_vbyte(0, &mut output);
        encode_vbyte(127, &mut output);
        encode_vbyte(128, &mut output);
        encode_vbyte(16383, &mut output);
        encode_vbyte(1_000_000, &mut output);

        let mut pos = 0;
        assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), 0);
        assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), 127);
        assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), 128);
        assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), 16383);
        assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), 1_000_000);
    }

    #[test]
    fn test_bitpack_encoding() {
        let values = vec![0, 1, 2, 3, 4, 5, 6, 7, 1000, 4000];
        let mut output = Vec::new();
        bitpack_encode(&values, &mut output);

        let mut pos = 0;
        let decoded = bitpack_decode(&output, &mut pos, values.len()).unwrap();
        assert_eq!(decoded, values);
        assert_eq!(pos, output.len());
    }

    #[test]
    fn test_postings_with_positions() {
        let (reader, meta) = write_list(
            (0..10)
                .map(|i| Posting::with_positions(DocNo(i * 10), (0..=i).map(|p| p * 3).collect()))
                .collect(),
        );
        assert_eq!(meta.doc_frequency, 10);
        assert_eq!(meta.total_term_frequency, 55);

        let postings = reader.get_postings(&meta).unwrap().read_all().unwrap();
        assert_eq!(postings.len(), 10);
        assert_eq!(postings[0].docno, DocNo(0));
        assert_eq!(postings[0].positions, vec![0]);
        assert_eq!(postings[5].docno, DocNo(50));
        assert_eq!(postings[5].term_frequency, 6);
        assert_eq!(postings[9].positions, vec![0, 3, 6, 9, 12, 15, 18, 21, 24, 27]);
    }

    #[test]
    fn test_multi_block_sequential_read() {
        let (reader, meta) =
            write_list((0..300).map(|i| Posting::with_positions(DocNo(i * 2 + 1), vec![i])).collect());

        let postings = reader.get_postings(&meta).unwrap().read_all().unwrap();
        assert_eq!(postings.len(), 300);
        for (i, posting) in postings.iter().enumerate() {
            assert_eq!(posting.docno, DocNo(i as u32 * 2 + 1));
            assert_eq!(posting.positions, vec![i as u32]);
        }
    }

    #[test]
    fn test_skip_to_across_blocks() {
        let (reader, meta) =
            write_list((0..300).map(|i| Posting::with_positions(DocNo(i * 2), vec![7])).collect());

        let mut iter = reader.get_postings(&meta).unwrap();
        assert_eq!(iter.skip_to(DocNo(401)).unwrap(), Some(DocNo(402)));
        assert_eq!(iter.positions(), &[7]);
        // Skipping backwards stays put
        assert_eq!(iter.skip_to(DocNo(10)).unwrap(), Some(DocNo(402)));
        assert_eq!(iter.advance().unwrap(), Some(DocNo(404)));
        assert_eq!(iter.skip_to(DocNo(598)).unwrap(), Some(DocNo(598)));
        assert_eq!(iter.skip_to(DocNo(599)).unwrap(), None);
        assert_eq!(iter.doc(), None);
    }

    #[test]
    fn test_skip_within_first_block() {
        let (reader, meta) =
            write_list((0..5).map(|i| Posting::with_positions(DocNo(i * 5), vec![0])).collect());

        let mut iter = reader.get_postings(&meta).unwrap();
        assert_eq!(iter.doc(), None);
        assert_eq!(iter.skip_to(DocNo(6)).unwrap(), Some(DocNo(10)));
        assert_eq!(iter.advance().unwrap(), Some(DocNo(15)));
        assert_eq!(iter.advance().unwrap(), Some(DocNo(20)));
        assert_eq!(iter.advance().unwrap(), None);
    }

    #[test]
    fn test_truncated_list_is_an_error() {
        let (reader, meta) =
            write_list((0..3).map(|i| Posting::with_positions(DocNo(i), vec![1, 2])).collect());
        let data = reader.get_postings(&meta).unwrap().data;
        let truncated = &data[..data.len() - 2];

        let mut iter = PostingIterator::new(truncated).unwrap();
        assert!(iter.advance().is_err());
    }
}
