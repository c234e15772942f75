//! Channels talking through a lossy relay.
//!
//! The relay forwards datagrams from the sender to the receiver and drops
//! the ones its filter rejects, standing in for a network that loses
//! packets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use shardcast_core::crypto::ChannelCipher;
use shardcast_core::wire::MAX_UDP_PAYLOAD;

use crate::{loopback_pair, payload, settle, Inbox, MAGIC};

/// Forward datagrams to `target`, keeping the n-th one only when `keep(n)`.
async fn relay(
    target: SocketAddr,
    keep: impl Fn(usize) -> bool + Send + 'static,
) -> (SocketAddr, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let forwarded = Arc::new(AtomicUsize::new(0));
    let count = forwarded.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        let mut n = 0usize;
        while let Ok((len, _)) = socket.recv_from(&mut buf).await {
            if keep(n) {
                count.fetch_add(1, Ordering::SeqCst);
                let _ = socket.send_to(&buf[..len], target).await;
            }
            n += 1;
        }
    });
    (addr, forwarded)
}

#[tokio::test]
async fn parity_covers_lost_datagrams() {
    let cipher = ChannelCipher::from_key(&[5; 32]);
    let inbox = Inbox::default();
    let (receiver, sender) = loopback_pair(&cipher, &inbox).await.unwrap();

    // One segment of 16 data + 16 parity; lose every fourth datagram.
    let (relay_addr, _) = relay(receiver.local_addr(), |n| n % 4 != 0).await;
    sender.set_destination(relay_addr);

    let message = payload(16 * 1024, 7);
    sender.send_message(MAGIC, &message, 100).await.unwrap();

    let seen = inbox.wait_for(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(seen[0].payload, message);

    sender.close().await.unwrap();
    receiver.close().await.unwrap();
}

#[tokio::test]
async fn data_shards_lost_early_are_rebuilt() {
    let cipher = ChannelCipher::from_key(&[6; 32]);
    let inbox = Inbox::default();
    let (receiver, sender) = loopback_pair(&cipher, &inbox).await.unwrap();

    // 4 data + 2 parity; the first two data shards never arrive.
    let (relay_addr, forwarded) = relay(receiver.local_addr(), |n| n >= 2).await;
    sender.set_destination(relay_addr);

    let message = payload(4000, 8);
    sender.send_message(MAGIC, &message, 50).await.unwrap();

    let seen = inbox.wait_for(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(seen[0].payload, message);
    assert_eq!(forwarded.load(Ordering::SeqCst), 4);

    sender.close().await.unwrap();
    receiver.close().await.unwrap();
}

#[tokio::test]
async fn too_much_loss_delivers_nothing() {
    let cipher = ChannelCipher::from_key(&[7; 32]);
    let inbox = Inbox::default();
    let (receiver, sender) = loopback_pair(&cipher, &inbox).await.unwrap();

    // 4 data + 2 parity; only three shards get through.
    let (relay_addr, _) = relay(receiver.local_addr(), |n| n % 2 == 0).await;
    sender.set_destination(relay_addr);

    sender.send_message(MAGIC, &payload(4000, 9), 50).await.unwrap();
    settle().await;
    assert!(inbox.snapshot().is_empty());

    sender.close().await.unwrap();
    receiver.close().await.unwrap();
}
