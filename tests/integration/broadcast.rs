//! Broadcast-mode channels over the all-hosts multicast group.
//!
//! Needs multicast routed on loopback; containers often lack it, so the
//! test skips itself instead of failing when nothing arrives.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use shardcast_core::crypto::ChannelCipher;
use shardcastd::{Channel, Endpoints, HandlerTable};

use crate::{payload, settings, Inbox, MAGIC};

/// Pick a port that is free right now.
fn free_port() -> u16 {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| s.local_addr())
        .map(|a| a.port())
        .unwrap_or(41_049)
}

#[tokio::test]
async fn broadcast_peers_hear_each_other() {
    let cipher = ChannelCipher::from_key(&[8; 32]);
    let port = free_port();
    let endpoints = Endpoints::Broadcast {
        port,
        interface: Ipv4Addr::UNSPECIFIED,
    };

    let inbox = Inbox::default();
    let listener = match Channel::open(&settings(), endpoints, cipher.clone(), inbox.table(MAGIC)).await {
        Ok(channel) => channel,
        Err(e) => {
            eprintln!("SKIP: multicast listener unavailable: {e}");
            return;
        }
    };
    let talker = match Channel::open(&settings(), endpoints, cipher, HandlerTable::new()).await {
        Ok(channel) => channel,
        Err(e) => {
            eprintln!("SKIP: multicast talker unavailable: {e}");
            return;
        }
    };
    assert_eq!(
        talker.destination(),
        SocketAddr::from((Ipv4Addr::new(224, 0, 0, 1), port))
    );

    let message = payload(5000, 10);
    if let Err(e) = talker.send_message(MAGIC, &message, 50).await {
        eprintln!("SKIP: multicast send failed: {e}");
        return;
    }

    match inbox.wait_for(1, Duration::from_secs(3)).await {
        Ok(seen) => assert_eq!(seen[0].payload, message),
        Err(e) => eprintln!("SKIP: no multicast delivery on this host: {e}"),
    }

    talker.close().await.unwrap();
    listener.close().await.unwrap();
}
