//! SVEC index file format.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic            "SVEC"   4 bytes
//! version          u16
//! dimension        u32
//! count            u32
//! built_at_ms      i64      unix millis
//! metadata_digest  [u8; 32] blake3 of the sibling metadata file
//! vectors          count × dimension × f32
//! checksum         [u8; 32] blake3 of every preceding byte
//! ```

use crate::index::FlatIndex;

pub const SVEC_MAGIC: [u8; 4] = *b"SVEC";
pub const SVEC_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 4 + 4 + 8 + 32;
const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub dimension: u32,
    pub count: u32,
    pub built_at_ms: i64,
    pub metadata_digest: [u8; 32],
}

pub fn encode(index: &FlatIndex, built_at_ms: i64, metadata_digest: [u8; 32]) -> Result<Vec<u8>, String> {
    let dimension = u32::try_from(index.dim()).map_err(|_| "dimension out of range".to_string())?;
    let count = u32::try_from(index.len()).map_err(|_| "too many vectors".to_string())?;
    let raw = index.raw();

    let mut buf = Vec::with_capacity(HEADER_LEN + raw.len() * 4 + CHECKSUM_LEN);
    buf.extend_from_slice(&SVEC_MAGIC);
    buf.extend_from_slice(&SVEC_VERSION.to_le_bytes());
    buf.extend_from_slice(&dimension.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    buf.extend_from_slice(&built_at_ms.to_le_bytes());
    buf.extend_from_slice(&metadata_digest);
    for x in raw {
        buf.extend_from_slice(&x.to_le_bytes());
    }
    let checksum = blake3::hash(&buf);
    buf.extend_from_slice(checksum.as_bytes());
    Ok(buf)
}

fn take<const N: usize>(bytes: &[u8], at: &mut usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[*at..*at + N]);
    *at += N;
    out
}

pub fn decode(bytes: &[u8]) -> Result<(IndexHeader, FlatIndex), String> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(format!("file too short ({} bytes)", bytes.len()));
    }
    let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if blake3::hash(body).as_bytes() != checksum {
        return Err("checksum mismatch".to_string());
    }

    let mut at = 0usize;
    let magic: [u8; 4] = take(body, &mut at);
    if magic != SVEC_MAGIC {
        return Err(format!("invalid magic {magic:?}"));
    }
    let version = u16::from_le_bytes(take(body, &mut at));
    if version != SVEC_VERSION {
        return Err(format!("unsupported version {version}"));
    }
    let dimension = u32::from_le_bytes(take(body, &mut at));
    let count = u32::from_le_bytes(take(body, &mut at));
    let built_at_ms = i64::from_le_bytes(take(body, &mut at));
    let metadata_digest: [u8; 32] = take(body, &mut at);

    let floats = (dimension as usize)
        .checked_mul(count as usize)
        .ok_or_else(|| "vector slab size overflows".to_string())?;
    let slab = &body[at..];
    if slab.len() != floats * 4 {
        return Err(format!("vector slab is {} bytes, expected {}", slab.len(), floats * 4));
    }
    let data: Vec<f32> = slab
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let header = IndexHeader { dimension, count, built_at_ms, metadata_digest };
    Ok((header, FlatIndex::from_raw(dimension as usize, data)))
}
