//! Tombstone file: deleted docnos per segment
//!
//! Layout: vbyte entry count, then per entry the segment id (u64 LE), the
//! vbyte length of the serialized roaring bitmap and the bitmap itself.

use roaring::RoaringBitmap;
use std::collections::BTreeMap;

use super::postings::{decode_vbyte, encode_vbyte, read_u64_le};
use super::types::SegmentId;
use crate::error::{QuarryError, Result};

pub fn encode_tombstones(deletes: &BTreeMap<SegmentId, &RoaringBitmap>) -> Result<Vec<u8>> {
    let non_empty: Vec<(&SegmentId, &&RoaringBitmap)> =
        deletes.iter().filter(|(_, b)| !b.is_empty()).collect();

    let mut output = Vec::new();
    encode_vbyte(non_empty.len() as u32, &mut output);
    for (id, bitmap) in non_empty {
        let mut bytes = Vec::with_capacity(bitmap.serialized_size());
        bitmap.serialize_into(&mut bytes)?;
        output.extend_from_slice(&id.0.to_le_bytes());
        encode_vbyte(bytes.len() as u32, &mut output);
        output.extend_from_slice(&bytes);
    }
    Ok(output)
}

pub fn decode_tombstones(data: &[u8]) -> Result<BTreeMap<SegmentId, RoaringBitmap>> {
    let mut pos = 0;
    let count = decode_vbyte(data, &mut pos)? as usize;

    let mut deletes = BTreeMap::new();
    for _ in 0..count {
        let id = SegmentId::new(read_u64_le(data, &mut pos)?);
        let len = decode_vbyte(data, &mut pos)? as usize;
        let bytes = data
            .get(pos..pos + len)
            .ok_or_else(|| QuarryError::corrupt("tombstone bitmap truncated"))?;
        let bitmap = RoaringBitmap::deserialize_from(bytes)
            .map_err(|e| QuarryError::corrupt(format!("bad tombstone bitmap: {}", e)))?;
        pos += len;
        deletes.insert(id, bitmap);
    }
    Ok(deletes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_skips_empty_bitmaps() {
        let a: RoaringBitmap = [1u32, 5, 9].into_iter().collect();
        let empty = RoaringBitmap::new();
        let b: RoaringBitmap = (0u32..1000).collect();

        let deletes = BTreeMap::from([
            (SegmentId::new(1), &a),
            (SegmentId::new(2), &empty),
            (SegmentId::new(7), &b),
        ]);
        let decoded = decode_tombstones(&encode_tombstones(&deletes).unwrap()).unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[&SegmentId::new(1)], a);
        assert_eq!(decoded[&SegmentId::new(7)], b);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let a: RoaringBitmap = [1u32, 2].into_iter().collect();
        let bytes = encode_tombstones(&BTreeMap::from([(SegmentId::new(1), &a)])).unwrap();
        assert!(decode_tombstones(&bytes[..bytes.len() - 3]).is_err());
    }
}
