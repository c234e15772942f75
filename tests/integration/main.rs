//! shardcast integration test harness.
//!
//! Tests here run real channels over the loopback interface. Broadcast
//! tests need multicast on loopback and skip themselves when it is absent:
//!
//!   cargo test --test integration
//!
//! Every channel binds port 0, so tests can run in parallel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use shardcast_core::config::ChannelSettings;
use shardcast_core::crypto::ChannelCipher;
use shardcastd::{handler_fn, Channel, Delivery, Endpoints, HandlerTable};

mod broadcast;
mod codec;
mod loopback;
mod lossy;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const PASSPHRASE: &str = "integration passphrase";
pub const MAGIC: [u8; 4] = *b"ITST";

pub fn settings() -> ChannelSettings {
    ChannelSettings {
        creator: "integration".into(),
        passphrase: PASSPHRASE.into(),
        sweep_interval_secs: 1,
        ..ChannelSettings::default()
    }
}

/// Deterministic pseudo-random payload.
pub fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut buf);
    buf
}

/// Collects every delivery made to the handler it hands out.
#[derive(Clone, Default)]
pub struct Inbox {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl Inbox {
    pub fn table(&self, magic: [u8; 4]) -> HandlerTable {
        let sink = self.deliveries.clone();
        let mut table = HandlerTable::new();
        table.register(
            magic,
            handler_fn(move |d| {
                sink.lock().unwrap().push(d.clone());
                Ok(())
            }),
        );
        table
    }

    pub fn snapshot(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Wait until at least `count` deliveries arrived.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Result<Vec<Delivery>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let seen = self.snapshot();
            if seen.len() >= count {
                return Ok(seen);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("expected {count} deliveries, got {} after {timeout:?}", seen.len());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// A receiver channel and a sender channel pointed at it, both on loopback
/// and sharing one cipher.
pub async fn loopback_pair(cipher: &ChannelCipher, inbox: &Inbox) -> Result<(Channel, Channel)> {
    let settings = settings();
    let receiver = Channel::open(
        &settings,
        Endpoints::Unicast {
            listen: "127.0.0.1:0".parse()?,
            send: "127.0.0.1:9".parse()?,
        },
        cipher.clone(),
        inbox.table(MAGIC),
    )
    .await?;
    let sender = Channel::open(
        &settings,
        Endpoints::Unicast {
            listen: "127.0.0.1:0".parse()?,
            send: receiver.local_addr(),
        },
        cipher.clone(),
        HandlerTable::new(),
    )
    .await?;
    Ok((receiver, sender))
}

/// Give in-flight datagrams time to land before asserting on absence.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}
