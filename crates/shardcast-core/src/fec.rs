//! Shard codec: Reed-Solomon forward error correction over fixed-size shards.
//!
//! A message is cut into SEGMENT_SIZE segments, each segment into SHARD_SIZE
//! data shards, and each segment gets `data * redundancy / 100` parity shards
//! computed over exactly its own data shards. Every shard carries an 8-byte
//! header so it can travel, and be lost, independently.
//!
//! The code is systematic: data shards are the original bytes verbatim
//! (zero-padded), so a receiver holding all data shards never touches the
//! codec. Any `data` shards out of a segment's `data + parity` are enough to
//! rebuild it via [`reconstruct_segment`].

use reed_solomon_erasure::galois_8::ReedSolomon;
use zerocopy::AsBytes;

use crate::wire::{
    pieces, ShardHeader, MAX_MESSAGE_LEN, MAX_SEGMENTS, MAX_SHARDS_PER_SEGMENT, SEGMENT_SIZE,
    SHARD_HEADER_LEN, SHARD_SIZE,
};

/// Headered shards of one segment, data shards first.
pub type Segment = Vec<Vec<u8>>;

/// All segments of one message, in order.
pub type ShardedSegments = Vec<Segment>;

/// Parity shards added to a segment of `data_shards` data shards.
///
/// Integer division, so small segments may get no parity at all at low
/// redundancy. 300 means three parity shards per data shard.
pub fn parity_shards(data_shards: usize, redundancy_percent: u32) -> usize {
    data_shards.saturating_mul(redundancy_percent as usize) / 100
}

/// Encode `buf` into headered, erasure-coded shards.
///
/// An empty buffer produces no segments.
pub fn encode(buf: &[u8], redundancy_percent: u32) -> Result<ShardedSegments, FecError> {
    let segment_count = pieces(buf.len(), SEGMENT_SIZE);
    if buf.len() > MAX_MESSAGE_LEN {
        return Err(FecError::TooManySegments(segment_count));
    }
    // segment_count <= 255 keeps the length well inside u32.
    let original_length = buf.len() as u32;

    let mut out = Vec::with_capacity(segment_count);
    for (segment_index, segment) in buf.chunks(SEGMENT_SIZE).enumerate() {
        let data = pieces(segment.len(), SHARD_SIZE);
        let parity = parity_shards(data, redundancy_percent);
        let total = data + parity;
        if total > MAX_SHARDS_PER_SEGMENT {
            return Err(FecError::TooManyShards(total));
        }

        let mut shards: Vec<Vec<u8>> = vec![vec![0u8; SHARD_SIZE]; total];
        for (slot, piece) in shards.iter_mut().zip(segment.chunks(SHARD_SIZE)) {
            slot[..piece.len()].copy_from_slice(piece);
        }

        if parity > 0 {
            let rs = ReedSolomon::new(data, parity).map_err(FecError::Codec)?;
            rs.encode(&mut shards).map_err(FecError::Codec)?;
        }

        let headered = shards
            .into_iter()
            .enumerate()
            .map(|(shard_index, body)| {
                let header = ShardHeader::new(
                    segment_index as u8,
                    segment_count as u8,
                    shard_index as u8,
                    total as u8,
                    original_length,
                );
                let mut shard = Vec::with_capacity(SHARD_HEADER_LEN + SHARD_SIZE);
                shard.extend_from_slice(header.as_bytes());
                shard.extend_from_slice(&body);
                shard
            })
            .collect();
        out.push(headered);
    }

    Ok(out)
}

/// Flatten segments into transmission order.
pub fn flatten(segments: ShardedSegments) -> Vec<Vec<u8>> {
    segments.into_iter().flatten().collect()
}

/// Rebuild the missing data shards of one segment in place.
///
/// `slots` holds the segment's shard bodies (headers stripped) by index,
/// data first then parity; `None` marks a lost shard. Succeeds when at least
/// `data_shards` slots are present, in any positions. Parity slots that were
/// missing stay `None`.
pub fn reconstruct_segment(
    slots: &mut [Option<Vec<u8>>],
    data_shards: usize,
) -> Result<(), FecError> {
    let present = slots.iter().filter(|s| s.is_some()).count();
    if data_shards == 0 || data_shards > slots.len() {
        return Err(FecError::Unrecoverable {
            present,
            required: data_shards,
        });
    }
    if slots[..data_shards].iter().all(Option::is_some) {
        return Ok(());
    }

    let parity = slots.len() - data_shards;
    if parity == 0 || present < data_shards {
        return Err(FecError::Unrecoverable {
            present,
            required: data_shards,
        });
    }

    let rs = ReedSolomon::new(data_shards, parity).map_err(FecError::Codec)?;
    rs.reconstruct_data(slots).map_err(FecError::Codec)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FecError {
    #[error("message needs {0} segments, a header can describe at most {}", MAX_SEGMENTS)]
    TooManySegments(usize),

    #[error("segment needs {0} shards, a header can describe at most {}", MAX_SHARDS_PER_SEGMENT)]
    TooManyShards(usize),

    #[error("only {present} shards present, {required} needed to rebuild the segment")]
    Unrecoverable { present: usize, required: usize },

    #[error("reed-solomon codec error: {0:?}")]
    Codec(reed_solomon_erasure::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
