use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Magic header of a protocol-v1 binary-delta payload.
pub const MAGIC: &[u8; 8] = b"BRDELTA1";

/// One instruction of a binary delta: either copy a range of the base file
/// or insert literal bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeltaChunk {
    Copy { offset: u64, length: u64 },
    Insert { data: Vec<u8> },
}

/// Serialize a chunk sequence into the on-disk payload format:
/// magic header followed by a zstd-compressed bincode body.
pub fn encode(chunks: &[DeltaChunk]) -> Result<Vec<u8>, Error> {
    let body = bincode::serialize(chunks)
        .map_err(|e| Error::ProtocolMismatch(format!("unencodable delta: {e}")))?;
    let compressed = zstd::bulk::compress(&body, 3)?;

    let mut payload = Vec::with_capacity(MAGIC.len() + compressed.len());
    payload.extend_from_slice(MAGIC);
    payload.extend_from_slice(&compressed);
    Ok(payload)
}

/// Apply a delta payload against the base bytes, producing the patched bytes.
///
/// The payload comes off the wire, so every copy range is bounds-checked
/// instead of trusted.
pub fn apply(base: &[u8], payload: &[u8]) -> Result<Vec<u8>, Error> {
    if payload.len() < MAGIC.len() || &payload[..MAGIC.len()] != MAGIC {
        return Err(Error::ProtocolMismatch(
            "delta payload is missing its magic header".to_string(),
        ));
    }

    let decoder = zstd::Decoder::new(&payload[MAGIC.len()..])?;
    let chunks: Vec<DeltaChunk> = bincode::deserialize_from(decoder)
        .map_err(|e| Error::ProtocolMismatch(format!("undecodable delta body: {e}")))?;

    apply_chunks(base, &chunks)
}

fn apply_chunks(base: &[u8], chunks: &[DeltaChunk]) -> Result<Vec<u8>, Error> {
    let estimated: u64 = chunks
        .iter()
        .map(|c| match c {
            DeltaChunk::Copy { length, .. } => *length,
            DeltaChunk::Insert { data } => data.len() as u64,
        })
        .sum();

    let mut result = Vec::with_capacity(estimated as usize);

    for chunk in chunks {
        match chunk {
            DeltaChunk::Copy { offset, length } => {
                let start = *offset as usize;
                let end = start
                    .checked_add(*length as usize)
                    .filter(|&end| end <= base.len())
                    .ok_or_else(|| {
                        Error::ProtocolMismatch(format!(
                            "delta copy range {offset}+{length} exceeds base of {} bytes",
                            base.len()
                        ))
                    })?;
                result.extend_from_slice(&base[start..end]);
            }
            DeltaChunk::Insert { data } => {
                result.extend_from_slice(data);
            }
        }
    }

    Ok(result)
}
