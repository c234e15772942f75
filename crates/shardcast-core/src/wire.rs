//! shardcast wire format: shard headers and datagram framing.
//!
//! Two layers travel on the wire:
//!
//!   datagram:  [magic:4][message_id:16][nonce:12][AES-GCM ciphertext + tag:16]
//!   plaintext: [segment_index:1][segment_count:1][shard_index:1][shard_count:1]
//!              [original_length:4 LE][shard body: SHARD_SIZE]
//!
//! The magic tag, message id and nonce travel in cleartext. The shard header
//! is inside the ciphertext so a receiver can only interpret it after the
//! datagram authenticates.
//!
//! Header structs are #[repr(C, packed)] with zerocopy derives; there is no
//! unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Largest slice of a message that is erasure-coded as one unit.
pub const SEGMENT_SIZE: usize = 16 * 1024;

/// Size of every shard body. The last data shard of a segment is zero-padded.
pub const SHARD_SIZE: usize = 1024;

/// Size of the plaintext header prepended to every shard.
pub const SHARD_HEADER_LEN: usize = 8;

/// Counts are single header bytes and zero is rejected, so 255 is the ceiling.
pub const MAX_SEGMENTS: usize = 255;

/// Data plus parity shards in one segment.
pub const MAX_SHARDS_PER_SEGMENT: usize = 255;

/// Largest message the header can describe.
pub const MAX_MESSAGE_LEN: usize = MAX_SEGMENTS * SEGMENT_SIZE;

pub const MAGIC_LEN: usize = 4;
pub const MESSAGE_ID_LEN: usize = 16;

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Cleartext bytes in front of the ciphertext.
pub const DATAGRAM_PREFIX_LEN: usize = MAGIC_LEN + MESSAGE_ID_LEN + NONCE_LEN;

/// Smallest datagram that can carry one full shard.
pub const MIN_DATAGRAM_SIZE: usize = DATAGRAM_PREFIX_LEN + SHARD_HEADER_LEN + SHARD_SIZE + TAG_LEN;

/// Largest UDP payload over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// IPv4 multicast group used by broadcast channels.
pub const MULTICAST_ADDR: &str = "224.0.0.1";

/// Default UDP port for broadcast channels.
pub const DEFAULT_PORT: u16 = 11049;

/// Message-type identifier used to route decoded payloads to handlers.
pub type Magic = [u8; MAGIC_LEN];

/// Correlation key shared by every shard of one message.
pub type MessageId = [u8; MESSAGE_ID_LEN];

// ── Geometry ──────────────────────────────────────────────────────────────────

/// Number of `size`-byte pieces needed to hold `len` bytes (ceiling division).
///
/// `size` must be non-zero.
pub fn pieces(len: usize, size: usize) -> usize {
    len.div_ceil(size)
}

/// Length of segment `segment_index` of a message of `original_length` bytes.
///
/// Zero for indices past the end of the message.
pub fn segment_len(original_length: usize, segment_index: usize) -> usize {
    original_length
        .saturating_sub(segment_index.saturating_mul(SEGMENT_SIZE))
        .min(SEGMENT_SIZE)
}

/// Data shards the encoder produced for segment `segment_index`.
pub fn required_data_shards(original_length: usize, segment_index: usize) -> usize {
    pieces(segment_len(original_length, segment_index), SHARD_SIZE)
}

// ── Shard Header ──────────────────────────────────────────────────────────────

/// Position of a shard within its message.
///
/// Every shard is self-describing: a receiver can allocate reassembly state
/// from whichever shard of a message arrives first.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ShardHeader {
    /// Zero-based segment this shard belongs to.
    pub segment_index: u8,

    /// Total segments in the message.
    pub segment_count: u8,

    /// Zero-based position within the segment. Indices below the segment's
    /// data shard count are data, the rest are parity.
    pub shard_index: u8,

    /// Data plus parity shards in this segment.
    pub shard_count: u8,

    /// Length of the whole original message, little-endian.
    pub original_length: U32<LittleEndian>,
}

assert_eq_size!(ShardHeader, [u8; SHARD_HEADER_LEN]);

impl ShardHeader {
    pub fn new(
        segment_index: u8,
        segment_count: u8,
        shard_index: u8,
        shard_count: u8,
        original_length: u32,
    ) -> Self {
        Self {
            segment_index,
            segment_count,
            shard_index,
            shard_count,
            original_length: U32::new(original_length),
        }
    }

    /// Split a decrypted shard into its header and body.
    ///
    /// Rejects anything the encoder could not have produced: a short buffer,
    /// zero counts, indices out of range, a segment count that disagrees with
    /// the declared length, fewer shards than data shards, or a body that is
    /// not exactly SHARD_SIZE bytes.
    pub fn parse(shard: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if shard.len() < SHARD_HEADER_LEN {
            return Err(WireError::MalformedShard("shorter than the shard header"));
        }
        let header = Self::read_from_prefix(shard)
            .ok_or(WireError::MalformedShard("unreadable shard header"))?;
        let body = &shard[SHARD_HEADER_LEN..];

        if header.segment_count == 0 {
            return Err(WireError::MalformedShard("zero segment count"));
        }
        if header.shard_count == 0 {
            return Err(WireError::MalformedShard("zero shard count"));
        }
        if header.segment_index >= header.segment_count {
            return Err(WireError::MalformedShard("segment index out of range"));
        }
        if header.shard_index >= header.shard_count {
            return Err(WireError::MalformedShard("shard index out of range"));
        }
        let length = header.original_length();
        if length == 0 {
            return Err(WireError::MalformedShard("zero message length"));
        }
        if pieces(length, SEGMENT_SIZE) != header.segment_count as usize {
            return Err(WireError::MalformedShard(
                "segment count disagrees with message length",
            ));
        }
        if header.required_data_shards() > header.shard_count as usize {
            return Err(WireError::MalformedShard("fewer shards than data shards"));
        }
        if body.len() != SHARD_SIZE {
            return Err(WireError::MalformedShard("shard body is not SHARD_SIZE bytes"));
        }

        Ok((header, body))
    }

    pub fn original_length(&self) -> usize {
        self.original_length.get() as usize
    }

    /// Data shards in this shard's segment, recomputed from the length field.
    pub fn required_data_shards(&self) -> usize {
        required_data_shards(self.original_length(), self.segment_index as usize)
    }

    /// Parity shards in this shard's segment.
    pub fn parity_shards(&self) -> usize {
        (self.shard_count as usize).saturating_sub(self.required_data_shards())
    }
}

// ── Datagram ──────────────────────────────────────────────────────────────────

/// Cleartext prefix of every datagram.
///
/// The message id groups the shards of one message; the nonce is drawn
/// fresh for every datagram and is only ever used for AES-GCM.
///
/// Wire size: 32 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct DatagramPrefix {
    /// Routes the decoded message to a handler.
    pub magic: Magic,

    /// Shared by all shards of one message.
    pub message_id: MessageId,

    /// AES-GCM nonce for this datagram's ciphertext.
    pub nonce: [u8; NONCE_LEN],
}

assert_eq_size!(DatagramPrefix, [u8; DATAGRAM_PREFIX_LEN]);

impl DatagramPrefix {
    /// Split a received datagram into its prefix and ciphertext.
    pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8]), WireError> {
        if datagram.len() < DATAGRAM_PREFIX_LEN + TAG_LEN {
            return Err(WireError::DatagramTooShort(datagram.len()));
        }
        let prefix = Self::read_from_prefix(datagram)
            .ok_or(WireError::DatagramTooShort(datagram.len()))?;
        Ok((prefix, &datagram[DATAGRAM_PREFIX_LEN..]))
    }

    /// Frame a sealed shard for transmission.
    pub fn frame(&self, ciphertext: &[u8]) -> Vec<u8> {
        let mut datagram = Vec::with_capacity(DATAGRAM_PREFIX_LEN + ciphertext.len());
        datagram.extend_from_slice(self.as_bytes());
        datagram.extend_from_slice(ciphertext);
        datagram
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("malformed shard: {0}")]
    MalformedShard(&'static str),

    #[error("datagram of {0} bytes is shorter than prefix and tag ({} bytes)", DATAGRAM_PREFIX_LEN + TAG_LEN)]
    DatagramTooShort(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
