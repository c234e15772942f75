//! shardcastd: the secure datagram channel and its demo daemon.
//!
//! A `Channel` erasure-codes outgoing messages, seals each shard into its
//! own UDP datagram and, on the receiving side, reassembles authenticated
//! shards and hands finished messages to the handler registered for their
//! magic tag.

pub mod buffers;
pub mod channel;
pub mod dispatch;
pub mod receive;
pub mod socket;

pub use channel::{Channel, ChannelError, Endpoints};
pub use dispatch::{handler_fn, Delivery, HandlerTable, MessageHandler};
