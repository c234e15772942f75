//! Routes decoded messages to the handler registered for their magic tag.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;

use shardcast_core::wire::{Magic, MessageId};

/// A fully reassembled message, as handed to a handler.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub magic: Magic,
    pub message_id: MessageId,
    /// Address the message's first shard came from.
    pub source: SocketAddr,
    /// Local address the receive socket is bound to.
    pub destination: SocketAddr,
    /// Creator name of the receiving channel.
    pub creator: Arc<str>,
    pub payload: Bytes,
}

/// Consumer of decoded messages for one magic tag.
///
/// Handlers run on the receive task, so they should return quickly and hand
/// long work to a task of their own. Any state a handler needs is captured
/// when it is built. Errors are logged by the channel and never stop it.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, delivery: &Delivery) -> anyhow::Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Delivery) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        self(delivery)
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(&Delivery) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Maps magic tags to handlers and dispatches decoded messages.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<Magic, Arc<dyn MessageHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for `magic`.
    pub fn register(&mut self, magic: Magic, handler: Arc<dyn MessageHandler>) -> &mut Self {
        if self.handlers.insert(magic, handler).is_some() {
            tracing::debug!(magic = %tag(&magic), "replaced message handler");
        }
        self
    }

    /// Whether datagrams carrying `magic` are worth decrypting.
    pub fn handles(&self, magic: &Magic) -> bool {
        self.handlers.contains_key(magic)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch a decoded message to its handler.
    /// Returns false if no handler is registered for its magic tag.
    pub fn dispatch(&self, delivery: &Delivery) -> bool {
        let Some(handler) = self.handlers.get(&delivery.magic) else {
            return false;
        };
        if let Err(e) = handler.handle(delivery) {
            tracing::warn!(
                magic = %tag(&delivery.magic),
                message_id = hex::encode(delivery.message_id),
                source = %delivery.source,
                error = %e,
                "message handler failed"
            );
        }
        true
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<String> = self.handlers.keys().map(tag).collect();
        tags.sort();
        f.debug_struct("HandlerTable").field("magic", &tags).finish()
    }
}

/// Render a magic tag for logs: as text when printable, else hex.
pub fn tag(magic: &Magic) -> String {
    if magic.iter().all(|b| b.is_ascii_graphic()) {
        String::from_utf8_lossy(magic).into_owned()
    } else {
        hex::encode(magic)
    }
}
