//! Secure channel: seals shards into datagrams on the way out and runs the
//! receive loop that turns datagrams back into messages.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use shardcast_core::config::{ChannelMode, ChannelSettings, ConfigError, ShardcastConfig};
use shardcast_core::crypto::{generate_message_id, ChannelCipher, CryptoError};
use shardcast_core::fec::{self, FecError};
use shardcast_core::wire::{Magic, MessageId};

use crate::buffers::BufferTable;
use crate::dispatch::{tag, HandlerTable};
use crate::receive::ReceiveLoop;
use crate::socket;

/// Where a channel listens and where it sends.
#[derive(Debug, Clone, Copy)]
pub enum Endpoints {
    Unicast {
        listen: SocketAddr,
        send: SocketAddr,
    },
    /// Every peer listens on `port` and sends to the all-hosts group.
    Broadcast { port: u16, interface: Ipv4Addr },
}

pub struct Channel {
    cipher: ChannelCipher,
    send_socket: UdpSocket,
    destination: RwLock<SocketAddr>,
    local_addr: SocketAddr,
    max_datagram_size: usize,
    shutdown: broadcast::Sender<()>,
    receive_task: Mutex<Option<JoinHandle<anyhow::Result<()>>>>,
}

impl Channel {
    /// Point-to-point channel keyed from `settings.passphrase`.
    pub async fn unicast(
        settings: &ChannelSettings,
        listen: SocketAddr,
        send: SocketAddr,
        handlers: HandlerTable,
    ) -> Result<Self, ChannelError> {
        let cipher = derive_cipher(settings).await?;
        Self::open(settings, Endpoints::Unicast { listen, send }, cipher, handlers).await
    }

    /// Multicast channel on `port`, keyed from `settings.passphrase`.
    pub async fn broadcast(
        settings: &ChannelSettings,
        port: u16,
        interface: Ipv4Addr,
        handlers: HandlerTable,
    ) -> Result<Self, ChannelError> {
        let cipher = derive_cipher(settings).await?;
        Self::open(settings, Endpoints::Broadcast { port, interface }, cipher, handlers).await
    }

    /// Build whichever channel the network section asks for.
    pub async fn from_config(
        config: &ShardcastConfig,
        handlers: HandlerTable,
    ) -> Result<Self, ChannelError> {
        let net = &config.network;
        match net.mode {
            ChannelMode::Unicast => {
                Self::unicast(&config.channel, net.listen_addr, net.send_addr, handlers).await
            }
            ChannelMode::Broadcast => {
                Self::broadcast(
                    &config.channel,
                    net.listen_addr.port(),
                    net.multicast_interface,
                    handlers,
                )
                .await
            }
        }
    }

    /// Bind sockets and start the receive loop with a ready-made cipher.
    pub async fn open(
        settings: &ChannelSettings,
        endpoints: Endpoints,
        cipher: ChannelCipher,
        handlers: HandlerTable,
    ) -> Result<Self, ChannelError> {
        settings.validate_runtime()?;
        if handlers.is_empty() {
            tracing::warn!("channel has no message handlers; every received datagram will be dropped");
        }
        let buffer_size = settings.socket_buffer_size;

        let (recv_std, send_std, destination) = match endpoints {
            Endpoints::Unicast { listen, send } => (
                socket::bind_unicast(listen, buffer_size).map_err(ChannelError::Socket)?,
                socket::bind_sender(send, buffer_size).map_err(ChannelError::Socket)?,
                send,
            ),
            Endpoints::Broadcast { port, interface } => {
                let group = socket::multicast_group().map_err(ChannelError::Socket)?;
                (
                    socket::bind_multicast(port, interface, buffer_size)
                        .map_err(ChannelError::Socket)?,
                    socket::bind_multicast_sender(interface, buffer_size)
                        .map_err(ChannelError::Socket)?,
                    SocketAddr::from((group, port)),
                )
            }
        };

        let recv_socket = Arc::new(UdpSocket::from_std(recv_std)?);
        let send_socket = UdpSocket::from_std(send_std)?;
        let local_addr = recv_socket.local_addr()?;

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let receive = ReceiveLoop::new(
            recv_socket,
            cipher.clone(),
            Arc::new(handlers),
            BufferTable::from_settings(settings),
            Arc::from(settings.creator.as_str()),
            settings.max_datagram_size,
            settings.sweep_interval(),
            shutdown_rx,
        )
        .map_err(ChannelError::ReceiveLoop)?;
        let receive_task = tokio::spawn(receive.run());

        tracing::info!(
            listen = %local_addr,
            destination = %destination,
            creator = %settings.creator,
            "channel open"
        );

        Ok(Self {
            cipher,
            send_socket,
            destination: RwLock::new(destination),
            local_addr,
            max_datagram_size: settings.max_datagram_size,
            shutdown,
            receive_task: Mutex::new(Some(receive_task)),
        })
    }

    /// Address the receive socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn destination(&self) -> SocketAddr {
        *self.destination.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Redirect all subsequent sends.
    pub fn set_destination(&self, addr: SocketAddr) {
        *self.destination.write().unwrap_or_else(PoisonError::into_inner) = addr;
    }

    /// Seal `data` and send it as one datagram. Returns bytes written.
    pub async fn send(
        &self,
        magic: Magic,
        message_id: MessageId,
        data: &[u8],
    ) -> Result<usize, ChannelError> {
        if data.is_empty() {
            return Err(ChannelError::EmptyPayload);
        }
        let datagram = self.cipher.seal(magic, message_id, data)?;
        if datagram.len() > self.max_datagram_size {
            return Err(ChannelError::DatagramTooLarge {
                len: datagram.len(),
                max: self.max_datagram_size,
            });
        }
        let written = self.send_socket.send_to(&datagram, self.destination()).await?;
        Ok(written)
    }

    /// Send every shard of one message under a fresh message id.
    ///
    /// A shard that fails to send is logged and skipped; erasure coding on
    /// the far side may still recover the message.
    pub async fn send_many<S: AsRef<[u8]>>(
        &self,
        magic: Magic,
        shards: &[S],
    ) -> Result<MessageId, ChannelError> {
        let message_id = generate_message_id();
        let mut failed = 0usize;
        for (index, shard) in shards.iter().enumerate() {
            if let Err(e) = self.send(magic, message_id, shard.as_ref()).await {
                failed += 1;
                tracing::warn!(
                    magic = %tag(&magic),
                    message_id = hex::encode(message_id),
                    shard = index,
                    error = %e,
                    "shard send failed"
                );
            }
        }
        tracing::trace!(
            magic = %tag(&magic),
            message_id = hex::encode(message_id),
            shards = shards.len(),
            failed,
            "message sent"
        );
        Ok(message_id)
    }

    /// Erasure-code `payload` with `redundancy_percent` parity and send it.
    pub async fn send_message(
        &self,
        magic: Magic,
        payload: &[u8],
        redundancy_percent: u32,
    ) -> Result<MessageId, ChannelError> {
        if payload.is_empty() {
            return Err(ChannelError::EmptyPayload);
        }
        let shards = fec::flatten(fec::encode(payload, redundancy_percent)?);
        self.send_many(magic, &shards[..]).await
    }

    /// Stop the receive loop and wait for it to finish. Idempotent.
    pub async fn close(&self) -> Result<(), ChannelError> {
        let Some(task) = self.receive_task.lock().await.take() else {
            return Ok(());
        };
        // No receivers means the loop already ended.
        let _ = self.shutdown.send(());
        task.await?.map_err(ChannelError::ReceiveLoop)?;
        tracing::info!(listen = %self.local_addr, "channel closed");
        Ok(())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("local_addr", &self.local_addr)
            .field("destination", &self.destination())
            .finish_non_exhaustive()
    }
}

/// Argon2 at 64 MiB takes a while; keep it off the async workers.
async fn derive_cipher(settings: &ChannelSettings) -> Result<ChannelCipher, ChannelError> {
    settings.validate()?;
    let passphrase = settings.passphrase.clone();
    let cipher = tokio::task::spawn_blocking(move || ChannelCipher::from_passphrase(&passphrase))
        .await??;
    Ok(cipher)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("refusing to send an empty payload")]
    EmptyPayload,

    #[error("sealed datagram is {len} bytes, limit is {max}")]
    DatagramTooLarge { len: usize, max: usize },

    #[error("encoding failed: {0}")]
    Encode(#[from] FecError),

    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("socket setup failed: {0:#}")]
    Socket(anyhow::Error),

    #[error("receive loop failed: {0:#}")]
    ReceiveLoop(anyhow::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
