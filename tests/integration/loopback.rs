//! Unicast channels over loopback.

use std::sync::Arc;
use std::time::Duration;

use shardcast_core::crypto::{generate_message_id, ChannelCipher};
use shardcast_core::fec::{encode, flatten};
use shardcastd::{Channel, HandlerTable};

use crate::{loopback_pair, payload, settings, settle, Inbox, MAGIC, PASSPHRASE};

#[tokio::test]
async fn five_shard_message_delivered_exactly_once() {
    let cipher = ChannelCipher::from_passphrase(PASSPHRASE).unwrap();
    let inbox = Inbox::default();
    let (receiver, sender) = loopback_pair(&cipher, &inbox).await.unwrap();

    // 3000 bytes at 67%: 3 data + 2 parity.
    let message = payload(3000, 1);
    let shards = flatten(encode(&message, 67).unwrap());
    assert_eq!(shards.len(), 5);

    // Every shard once, then shard 0 again under the same message id.
    let id = generate_message_id();
    for shard in shards.iter().chain(std::iter::once(&shards[0])) {
        sender.send(MAGIC, id, shard).await.unwrap();
    }

    let seen = inbox.wait_for(1, Duration::from_secs(5)).await.unwrap();
    settle().await;
    let seen_after = inbox.snapshot();
    assert_eq!(seen_after.len(), 1, "message delivered more than once");

    let delivery = &seen[0];
    assert_eq!(delivery.payload, message);
    assert_eq!(delivery.magic, MAGIC);
    assert_eq!(delivery.message_id, id);
    assert_eq!(delivery.destination, receiver.local_addr());
    assert_eq!(&*delivery.creator, "integration");

    sender.close().await.unwrap();
    receiver.close().await.unwrap();
}

#[tokio::test]
async fn passphrase_channels_exchange_messages() {
    let inbox = Inbox::default();
    let settings = settings();
    let receiver = Channel::unicast(
        &settings,
        "127.0.0.1:0".parse().unwrap(),
        "127.0.0.1:9".parse().unwrap(),
        inbox.table(MAGIC),
    )
    .await
    .unwrap();
    let sender = Channel::unicast(
        &settings,
        "127.0.0.1:0".parse().unwrap(),
        receiver.local_addr(),
        HandlerTable::new(),
    )
    .await
    .unwrap();

    let small = b"a message that fits in one shard".to_vec();
    let large = payload(40_000, 2);
    let small_id = sender.send_message(MAGIC, &small, 50).await.unwrap();
    let large_id = sender.send_message(MAGIC, &large, 25).await.unwrap();
    assert_ne!(small_id, large_id);

    let seen = inbox.wait_for(2, Duration::from_secs(10)).await.unwrap();
    let by_id = |id: [u8; 16]| seen.iter().find(|d| d.message_id == id).unwrap();
    assert_eq!(by_id(small_id).payload, small);
    assert_eq!(by_id(large_id).payload, large);

    sender.close().await.unwrap();
    receiver.close().await.unwrap();
}

#[tokio::test]
async fn different_passphrases_do_not_talk() {
    let inbox = Inbox::default();
    let receiver_cipher = ChannelCipher::from_passphrase("receiver passphrase").unwrap();
    let sender_cipher = ChannelCipher::from_passphrase("sender passphrase").unwrap();

    let (receiver, _) = loopback_pair(&receiver_cipher, &inbox).await.unwrap();
    let (_, sender) = loopback_pair(&sender_cipher, &Inbox::default()).await.unwrap();
    sender.set_destination(receiver.local_addr());

    sender.send_message(MAGIC, b"can you hear me", 50).await.unwrap();
    settle().await;
    assert!(inbox.snapshot().is_empty());
}

#[tokio::test]
async fn unregistered_magic_is_ignored() {
    let cipher = ChannelCipher::from_key(&[3; 32]);
    let inbox = Inbox::default();
    let (receiver, sender) = loopback_pair(&cipher, &inbox).await.unwrap();

    sender.send_message(*b"ELSE", b"not for you", 0).await.unwrap();
    sender.send_message(MAGIC, b"for you", 0).await.unwrap();

    let seen = inbox.wait_for(1, Duration::from_secs(5)).await.unwrap();
    settle().await;
    assert_eq!(inbox.snapshot().len(), 1);
    assert_eq!(seen[0].payload, b"for you".to_vec());

    sender.close().await.unwrap();
    receiver.close().await.unwrap();
}

#[tokio::test]
async fn set_destination_redirects_traffic() {
    let cipher = ChannelCipher::from_key(&[4; 32]);
    let first = Inbox::default();
    let second = Inbox::default();
    let (first_rx, sender) = loopback_pair(&cipher, &first).await.unwrap();
    let (second_rx, _) = loopback_pair(&cipher, &second).await.unwrap();

    sender.send_message(MAGIC, b"one", 0).await.unwrap();
    first.wait_for(1, Duration::from_secs(5)).await.unwrap();

    sender.set_destination(second_rx.local_addr());
    sender.send_message(MAGIC, b"two", 0).await.unwrap();
    let seen = second.wait_for(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(seen[0].payload, b"two".to_vec());
    assert_eq!(first.snapshot().len(), 1);

    first_rx.close().await.unwrap();
    second_rx.close().await.unwrap();
}

#[tokio::test]
async fn concurrent_senders_share_one_channel() {
    let cipher = ChannelCipher::from_key(&[9; 32]);
    let inbox = Inbox::default();
    let (receiver, sender) = loopback_pair(&cipher, &inbox).await.unwrap();
    let sender = Arc::new(sender);

    let tasks: Vec<_> = (0..8u64)
        .map(|n| {
            let sender = sender.clone();
            tokio::spawn(async move {
                let message = payload(3000, 100 + n);
                let id = sender.send_message(MAGIC, &message, 50).await?;
                anyhow::Ok((id, message))
            })
        })
        .collect();

    let mut sent = Vec::new();
    for task in tasks {
        sent.push(task.await.unwrap().unwrap());
    }

    let seen = inbox.wait_for(sent.len(), Duration::from_secs(10)).await.unwrap();
    settle().await;
    assert_eq!(inbox.snapshot().len(), sent.len(), "a message was delivered twice");
    for (id, message) in &sent {
        let delivered: Vec<_> = seen.iter().filter(|d| d.message_id == *id).collect();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload, *message);
    }

    sender.close().await.unwrap();
    receiver.close().await.unwrap();
}
