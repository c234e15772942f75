//! Reassembly engine. Accumulates the shards of one message as they arrive
//! out of order and rebuilds the message once enough of them are present.
//!
//! A `Partials` is created from whichever shard of a message arrives first;
//! the shard headers are self-describing so no out-of-band setup is needed.
//! The engine is pure state: it never logs and never touches the network.

use crate::fec::{self, FecError};
use crate::wire::{required_data_shards, ShardHeader, WireError, SHARD_SIZE};

/// Reassembly state for one segment.
#[derive(Debug, Clone)]
pub struct PartialSegment {
    required_data_shards: usize,
    parity_shards: usize,
    /// Shard bodies by index, allocated when the segment's first shard lands.
    shard_slots: Vec<Option<Vec<u8>>>,
    /// The first `required_data_shards` slots are all filled.
    all_data_present: bool,
}

impl PartialSegment {
    fn expecting(required_data_shards: usize) -> Self {
        Self {
            required_data_shards,
            parity_shards: 0,
            shard_slots: Vec::new(),
            all_data_present: false,
        }
    }

    pub fn required_data_shards(&self) -> usize {
        self.required_data_shards
    }

    /// Zero until the segment's first shard has been seen.
    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Shards physically present, data and parity, any positions.
    pub fn received(&self) -> usize {
        self.shard_slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.all_data_present
    }

    /// Data shards only count when they form an unbroken prefix by index.
    fn refresh_completeness(&mut self) {
        let prefix = self
            .shard_slots
            .iter()
            .take_while(|slot| slot.is_some())
            .count();
        self.all_data_present = prefix >= self.required_data_shards;
    }

    fn append_data(&self, slots: &[Option<Vec<u8>>], out: &mut Vec<u8>) -> Result<(), FecError> {
        for slot in &slots[..self.required_data_shards] {
            let body = slot.as_deref().ok_or(FecError::Unrecoverable {
                present: self.received(),
                required: self.required_data_shards,
            })?;
            out.extend_from_slice(body);
        }
        Ok(())
    }
}

/// Reassembly state for one in-flight message.
#[derive(Debug, Clone)]
pub struct Partials {
    segment_count: usize,
    original_length: usize,
    segments: Vec<PartialSegment>,
}

impl Partials {
    /// Start reassembly from the first shard seen for a message.
    pub fn new(first_shard: &[u8]) -> Result<Self, ReassemblyError> {
        let (header, _) = ShardHeader::parse(first_shard)?;
        let original_length = header.original_length();
        let segment_count = header.segment_count as usize;

        let segments = (0..segment_count)
            .map(|i| PartialSegment::expecting(required_data_shards(original_length, i)))
            .collect();

        let mut partials = Self {
            segment_count,
            original_length,
            segments,
        };
        partials.add_shard(first_shard)?;
        Ok(partials)
    }

    /// Install a shard.
    ///
    /// The shard must agree with the message on segment count and length, and
    /// with its segment on shard count. A shard that disagrees most likely
    /// belongs to a different message; it is rejected and nothing changes.
    /// A shard already present is overwritten in place.
    pub fn add_shard(&mut self, shard: &[u8]) -> Result<(), ReassemblyError> {
        let (header, body) = ShardHeader::parse(shard)?;

        let segment_count = header.segment_count as usize;
        if segment_count != self.segment_count {
            return Err(ReassemblyError::SegmentCountMismatch {
                expected: self.segment_count,
                found: segment_count,
            });
        }
        let original_length = header.original_length();
        if original_length != self.original_length {
            return Err(ReassemblyError::LengthMismatch {
                expected: self.original_length,
                found: original_length,
            });
        }

        let segment_index = header.segment_index as usize;
        let shard_count = header.shard_count as usize;
        let segment = &mut self.segments[segment_index];
        if segment.shard_slots.is_empty() {
            segment.shard_slots = vec![None; shard_count];
        } else if segment.shard_slots.len() != shard_count {
            return Err(ReassemblyError::ShardCountMismatch {
                segment: segment_index,
                expected: segment.shard_slots.len(),
                found: shard_count,
            });
        }

        segment.required_data_shards = header.required_data_shards();
        segment.parity_shards = header.parity_shards();
        segment.shard_slots[header.shard_index as usize] = Some(body.to_vec());
        if !segment.all_data_present {
            segment.refresh_completeness();
        }
        Ok(())
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn original_length(&self) -> usize {
        self.original_length
    }

    pub fn segments(&self) -> &[PartialSegment] {
        &self.segments
    }

    /// Shards physically present across all segments.
    pub fn received_shards(&self) -> usize {
        self.segments.iter().map(PartialSegment::received).sum()
    }

    /// Every segment holds all of its data shards as an index prefix.
    pub fn has_all_data_shards(&self) -> bool {
        self.segments.iter().all(|s| s.all_data_present)
    }

    /// Every segment is either complete or holds at least as many shards as
    /// it has data shards. Optimistic: says decoding is worth attempting.
    pub fn has_minimum(&self) -> bool {
        self.segments
            .iter()
            .all(|s| s.all_data_present || s.received() >= s.required_data_shards)
    }

    /// How well the message arrived, over all segments combined.
    ///
    /// Zero when exactly the minimum number of shards is present. Above the
    /// minimum, the fraction of the redundancy that arrived, in (0, 1]. Below
    /// it, `(received - min) / min`: negative, with magnitude equal to the
    /// fractional shortfall.
    pub fn ratio(&self) -> f64 {
        let (mut received, mut min, mut max) = (0usize, 0usize, 0usize);
        for segment in &self.segments {
            received += segment.received();
            min += segment.required_data_shards;
            max += segment.required_data_shards + segment.parity_shards;
        }

        if received > min {
            (received - min) as f64 / (max - min) as f64
        } else if received == min || min == 0 {
            0.0
        } else {
            -((min - received) as f64) / min as f64
        }
    }

    /// Rebuild the original message.
    ///
    /// Segments holding all data shards are concatenated directly; other
    /// segments are erasure-decoded from whatever data and parity shards
    /// arrived.
    pub fn decode(&self) -> Result<Vec<u8>, ReassemblyError> {
        if !self.has_all_data_shards() && !self.has_minimum() {
            return Err(ReassemblyError::InsufficientShards {
                deficit: -self.ratio(),
            });
        }

        let mut out = Vec::with_capacity(self.original_length + SHARD_SIZE);
        for (index, segment) in self.segments.iter().enumerate() {
            let result = if segment.all_data_present {
                segment.append_data(&segment.shard_slots, &mut out)
            } else {
                let mut slots = segment.shard_slots.clone();
                fec::reconstruct_segment(&mut slots, segment.required_data_shards)
                    .and_then(|()| segment.append_data(&slots, &mut out))
            };
            result.map_err(|source| ReassemblyError::Reconstruction {
                segment: index,
                source,
            })?;
        }
        out.truncate(self.original_length);
        Ok(out)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReassemblyError {
    #[error(transparent)]
    Malformed(#[from] WireError),

    #[error("shard belongs to a {found}-segment message, bundle has {expected}")]
    SegmentCountMismatch { expected: usize, found: usize },

    #[error("shard declares a {found}-byte message, bundle has {expected}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("segment {segment} has {expected} shard slots, shard declares {found}")]
    ShardCountMismatch {
        segment: usize,
        expected: usize,
        found: usize,
    },

    #[error("not enough shards, {deficit:.3} short of the minimum")]
    InsufficientShards { deficit: f64 },

    #[error("segment {segment} could not be rebuilt: {source}")]
    Reconstruction {
        segment: usize,
        #[source]
        source: FecError,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
