//! shardcast-core: wire format, shard codec, reassembly, and cryptographic
//! primitives. Pure library code with no I/O beyond reading its config file.
//! The daemon crate builds the network channel on top of this one.

pub mod config;
pub mod crypto;
pub mod fec;
pub mod reassembly;
pub mod wire;

pub use config::{ChannelMode, ShardcastConfig};
pub use crypto::ChannelCipher;
pub use reassembly::Partials;
pub use wire::{Magic, MessageId};
