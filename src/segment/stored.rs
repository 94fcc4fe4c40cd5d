//! Stored-field store of a segment
//!
//! File layout:
//! - vbyte record count
//! - one u64 (little endian) offset per docno, relative to the first record
//! - records
//!
//! Record format:
//! - u32 length (little endian)
//! - u32 crc32 of payload
//! - bincode payload (`Vec<FieldValue>`)

use crc32fast::Hasher;

use super::postings::{decode_vbyte, encode_vbyte, read_u64_le};
use super::types::DocNo;
use crate::error::{QuarryError, Result};
use crate::models::{FieldValue, StoredDocument};

/// Accumulates stored documents in docno order
#[derive(Default)]
pub struct StoredFieldsWriter {
    records: Vec<u8>,
    offsets: Vec<u64>,
}

impl StoredFieldsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the stored values of the next docno
    pub fn add(&mut self, fields: &[FieldValue]) -> Result<()> {
        let payload = bincode::serialize(fields)?;

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let crc32 = hasher.finalize();

        self.offsets.push(self.records.len() as u64);
        self.records
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.records.extend_from_slice(&crc32.to_le_bytes());
        self.records.extend_from_slice(&payload);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        let mut output = Vec::with_capacity(5 + self.offsets.len() * 8 + self.records.len());
        encode_vbyte(self.offsets.len() as u32, &mut output);
        for offset in &self.offsets {
            output.extend_from_slice(&offset.to_le_bytes());
        }
        output.extend_from_slice(&self.records);
        output
    }
}

/// Random access to stored documents by docno
pub struct StoredFieldsReader {
    data: Vec<u8>,
    offsets: Vec<u64>,
    records_start: usize,
}

impl StoredFieldsReader {
    pub fn open(data: Vec<u8>) -> Result<Self> {
        let mut pos = 0;
        let count = decode_vbyte(&data, &mut pos)? as usize;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(read_u64_le(&data, &mut pos)?);
        }

        Ok(Self {
            data,
            offsets,
            records_start: pos,
        })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Raw stored values of `docno`, validating the record checksum
    pub fn get_fields(&self, docno: DocNo) -> Result<Vec<FieldValue>> {
        let offset = self.offsets.get(docno.as_usize()).ok_or_else(|| {
            QuarryError::InvalidRequest(format!("docno {} out of range", docno.0))
        })?;
        let start = self.records_start + *offset as usize;

        let header = self
            .data
            .get(start..start + 8)
            .ok_or_else(|| QuarryError::corrupt("stored record header truncated"))?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let stored_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let payload = self
            .data
            .get(start + 8..start + 8 + len)
            .ok_or_else(|| QuarryError::corrupt("stored record payload truncated"))?;

        let mut hasher = Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(QuarryError::corrupt(format!(
                "stored record checksum mismatch for docno {}",
                docno.0
            )));
        }

        Ok(bincode::deserialize(payload)?)
    }

    pub fn get(&self, docno: DocNo) -> Result<StoredDocument> {
        Ok(StoredDocument::new(self.get_fields(docno)?))
    }
}
