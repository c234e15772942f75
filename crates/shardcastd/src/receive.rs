//! The channel's receive loop.
//!
//! Reads datagrams until shutdown, drops anything it cannot authenticate or
//! route, feeds shards into the per-message buffers and hands each message
//! to its handler exactly once.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use shardcast_core::crypto::ChannelCipher;
use shardcast_core::wire::{DatagramPrefix, MIN_DATAGRAM_SIZE};

use crate::buffers::{BufferTable, Outcome};
use crate::dispatch::{tag, Delivery, HandlerTable};

pub struct ReceiveLoop {
    socket: Arc<UdpSocket>,
    cipher: ChannelCipher,
    handlers: Arc<HandlerTable>,
    buffers: BufferTable,
    creator: Arc<str>,
    local_addr: SocketAddr,
    max_datagram_size: usize,
    sweep_interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl ReceiveLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: Arc<UdpSocket>,
        cipher: ChannelCipher,
        handlers: Arc<HandlerTable>,
        buffers: BufferTable,
        creator: Arc<str>,
        max_datagram_size: usize,
        sweep_interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            cipher,
            handlers,
            buffers,
            creator,
            local_addr,
            max_datagram_size,
            sweep_interval,
            shutdown,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; self.max_datagram_size];
        let mut sweep_interval = tokio::time::interval(self.sweep_interval);

        tracing::info!(addr = %self.local_addr, handlers = ?self.handlers, "receive loop starting");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!(addr = %self.local_addr, "receive loop shutting down");
                    return Ok(());
                }

                _ = sweep_interval.tick() => {
                    let evicted = self.buffers.evict_idle(Instant::now());
                    if evicted > 0 {
                        tracing::debug!(evicted, pending = self.buffers.len(), "evicted idle message buffers");
                    }
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, source) = match result {
                        Ok(r) => r,
                        Err(e) if socket_closed(&e) => {
                            tracing::info!(error = %e, "receive socket closed");
                            return Ok(());
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };

                    if let Some(delivery) = self.handle_datagram(&buf[..len], source) {
                        if !self.handlers.dispatch(&delivery) {
                            tracing::debug!(magic = %tag(&delivery.magic), "handler vanished");
                        }
                    }
                }
            }
        }
    }

    /// Run one datagram through authentication and reassembly. Returns the
    /// delivery when this datagram completed its message.
    fn handle_datagram(&mut self, datagram: &[u8], source: SocketAddr) -> Option<Delivery> {
        if datagram.len() < MIN_DATAGRAM_SIZE {
            tracing::trace!(len = datagram.len(), source = %source, "datagram too short, discarding");
            return None;
        }

        let (prefix, ciphertext) = match DatagramPrefix::parse(datagram) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::trace!(error = %e, "unparseable datagram, discarding");
                return None;
            }
        };

        let magic = prefix.magic;
        if !self.handlers.handles(&magic) {
            tracing::trace!(magic = %tag(&magic), source = %source, "no handler for magic, discarding");
            return None;
        }

        let shard = match self.cipher.open(&prefix, ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::debug!(source = %source, error = %e, "discarding datagram");
                return None;
            }
        };

        let message_id = prefix.message_id;
        match self.buffers.accept(message_id, &shard, source, Instant::now()) {
            Ok(Outcome::Decoded(payload)) => {
                let (origin, span) = self
                    .buffers
                    .get(&message_id)
                    .map(|b| (b.source(), b.span()))
                    .unwrap_or((source, Duration::ZERO));
                tracing::debug!(
                    magic = %tag(&magic),
                    message_id = hex::encode(message_id),
                    len = payload.len(),
                    source = %origin,
                    span_ms = span.as_millis() as u64,
                    "message decoded"
                );
                Some(Delivery {
                    magic,
                    message_id,
                    source: origin,
                    destination: self.local_addr,
                    creator: self.creator.clone(),
                    payload: Bytes::from(payload),
                })
            }
            Ok(Outcome::Pending | Outcome::AlreadyDecoded) => None,
            Err(e) => {
                tracing::debug!(
                    message_id = hex::encode(message_id),
                    source = %source,
                    error = %e,
                    "shard rejected"
                );
                None
            }
        }
    }
}

fn socket_closed(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::NotConnected | ErrorKind::BrokenPipe | ErrorKind::ConnectionAborted
    )
}
