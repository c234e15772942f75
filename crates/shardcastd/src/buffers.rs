//! Per-message reassembly buffers, keyed by message id.
//!
//! Owned by the receive task; no locking. Each buffer decodes at most once,
//! so a message is delivered once no matter how many extra shards or
//! duplicates arrive afterwards.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use shardcast_core::config::ChannelSettings;
use shardcast_core::reassembly::{Partials, ReassemblyError};
use shardcast_core::wire::MessageId;

/// Reassembly state for one message id.
#[derive(Debug)]
pub struct MsgBuffer {
    partials: Partials,
    decoded: bool,
    /// Datagrams accepted for this id, duplicates and post-decode ones included.
    datagrams: usize,
    first_seen: Instant,
    last_seen: Instant,
    /// Sender of the first shard.
    source: SocketAddr,
}

impl MsgBuffer {
    pub fn is_decoded(&self) -> bool {
        self.decoded
    }

    pub fn datagrams(&self) -> usize {
        self.datagrams
    }

    pub fn partials(&self) -> &Partials {
        &self.partials
    }

    pub fn source(&self) -> SocketAddr {
        self.source
    }

    /// Time from the first shard to the most recent one.
    pub fn span(&self) -> Duration {
        self.last_seen.saturating_duration_since(self.first_seen)
    }
}

/// What one accepted shard did to its message.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Still accumulating.
    Pending,
    /// This shard completed the message.
    Decoded(Vec<u8>),
    /// The message was already delivered; the shard was surplus.
    AlreadyDecoded,
}

#[derive(Debug)]
pub struct BufferTable {
    entries: HashMap<MessageId, MsgBuffer>,
    decode_threshold: usize,
    sweep_min_shards: usize,
    idle_timeout: Duration,
}

impl BufferTable {
    pub fn new(decode_threshold: usize, sweep_min_shards: usize, idle_timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            decode_threshold,
            sweep_min_shards,
            idle_timeout,
        }
    }

    pub fn from_settings(settings: &ChannelSettings) -> Self {
        Self::new(
            settings.decode_threshold,
            settings.sweep_min_shards,
            settings.idle_timeout(),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&MsgBuffer> {
        self.entries.get(id)
    }

    /// Feed one decrypted shard into the buffer for `id`.
    ///
    /// A shard that cannot start or join its message is returned as an
    /// error and leaves the table unchanged. A failed decode attempt is
    /// logged and the buffer keeps accumulating.
    pub fn accept(
        &mut self,
        id: MessageId,
        shard: &[u8],
        source: SocketAddr,
        now: Instant,
    ) -> Result<Outcome, ReassemblyError> {
        if let Some(buffer) = self.entries.get_mut(&id).filter(|b| b.decoded) {
            buffer.datagrams += 1;
            buffer.last_seen = now;
            self.sweep_decoded(&id);
            return Ok(Outcome::AlreadyDecoded);
        }

        let buffer = match self.entries.entry(id) {
            Entry::Occupied(slot) => {
                let buffer = slot.into_mut();
                buffer.partials.add_shard(shard)?;
                buffer.datagrams += 1;
                buffer.last_seen = now;
                buffer
            }
            Entry::Vacant(slot) => slot.insert(MsgBuffer {
                partials: Partials::new(shard)?,
                decoded: false,
                datagrams: 1,
                first_seen: now,
                last_seen: now,
                source,
            }),
        };

        let partials = &buffer.partials;
        if partials.received_shards() < self.decode_threshold && !partials.has_all_data_shards() {
            return Ok(Outcome::Pending);
        }

        match partials.decode() {
            Ok(payload) => {
                buffer.decoded = true;
                Ok(Outcome::Decoded(payload))
            }
            Err(e) => {
                tracing::debug!(
                    message_id = hex::encode(id),
                    received = partials.received_shards(),
                    error = %e,
                    "decode attempt failed, still accumulating"
                );
                Ok(Outcome::Pending)
            }
        }
    }

    /// Drop other decoded messages that have soaked up more than
    /// `sweep_min_shards` datagrams; their stragglers are no longer useful.
    fn sweep_decoded(&mut self, keep: &MessageId) {
        let min = self.sweep_min_shards;
        let before = self.entries.len();
        self.entries
            .retain(|id, buffer| id == keep || !(buffer.decoded && buffer.datagrams > min));
        let swept = before - self.entries.len();
        if swept > 0 {
            tracing::trace!(swept, "swept decoded message buffers");
        }
    }

    /// Forget every message that has been silent for `idle_timeout`.
    /// Returns how many were dropped.
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let timeout = self.idle_timeout;
        let before = self.entries.len();
        self.entries
            .retain(|_, buffer| now.saturating_duration_since(buffer.last_seen) < timeout);
        before - self.entries.len()
    }
}
