//! shardcastd: demo daemon for a shardcast channel.
//!
//! Announces itself with a periodic heartbeat, prints heartbeats and text
//! messages from peers, and sends each line typed on stdin as a text
//! message. `/to <addr>` on stdin redirects a unicast channel.
//!
//! Usage: shardcastd [send_addr]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use shardcast_core::config::ShardcastConfig;
use shardcast_core::crypto::hash;
use shardcast_core::wire::Magic;
use shardcastd::{handler_fn, Channel, HandlerTable};

const HEARTBEAT: Magic = *b"HBT1";
const TEXT: Magic = *b"TXT1";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
struct Heartbeat {
    creator: String,
    sequence: u64,
    sent_at_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn handlers() -> HandlerTable {
    let mut table = HandlerTable::new();
    table.register(
        HEARTBEAT,
        handler_fn(|d| {
            let beat: Heartbeat =
                serde_json::from_slice(&d.payload).context("malformed heartbeat")?;
            tracing::info!(
                peer = %beat.creator,
                source = %d.source,
                sequence = beat.sequence,
                latency_ms = now_ms().saturating_sub(beat.sent_at_ms),
                "heartbeat"
            );
            Ok(())
        }),
    );
    table.register(
        TEXT,
        handler_fn(|d| {
            let digest = hash(&d.payload);
            tracing::debug!(
                source = %d.source,
                len = d.payload.len(),
                digest = hex::encode(&digest[..8]),
                "text message"
            );
            println!("[{}] {}", d.source, String::from_utf8_lossy(&d.payload));
            Ok(())
        }),
    );
    table
}

async fn heartbeat_loop(
    channel: Arc<Channel>,
    creator: String,
    redundancy_percent: u32,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut sequence = 0u64;
    loop {
        tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            _ = interval.tick() => {
                let beat = Heartbeat { creator: creator.clone(), sequence, sent_at_ms: now_ms() };
                let payload = serde_json::to_vec(&beat)?;
                if let Err(e) = channel.send_message(HEARTBEAT, &payload, redundancy_percent).await {
                    tracing::warn!(error = %e, sequence, "heartbeat send failed");
                }
                sequence += 1;
            }
        }
    }
}

async fn stdin_loop(
    channel: Arc<Channel>,
    redundancy_percent: u32,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            line = lines.next_line() => line.context("reading stdin")?,
        };
        let Some(line) = line else {
            tracing::info!("stdin closed, receive only");
            let _ = shutdown.recv().await;
            return Ok(());
        };

        if let Some(addr) = line.strip_prefix("/to ") {
            match addr.trim().parse::<SocketAddr>() {
                Ok(addr) => {
                    channel.set_destination(addr);
                    tracing::info!(destination = %addr, "destination changed");
                }
                Err(e) => tracing::warn!(error = %e, input = addr, "bad address"),
            }
            continue;
        }
        if line.is_empty() {
            continue;
        }
        match channel.send_message(TEXT, line.as_bytes(), redundancy_percent).await {
            Ok(id) => tracing::debug!(message_id = hex::encode(id), "text sent"),
            Err(e) => tracing::warn!(error = %e, "text send failed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ShardcastConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = ShardcastConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ShardcastConfig::default()
    });
    if let Some(addr) = std::env::args().nth(1) {
        config.network.send_addr = addr
            .parse()
            .with_context(|| format!("invalid send address {addr:?}"))?;
    }
    config.validate().with_context(|| {
        format!("fix {} or set SHARDCAST_CHANNEL__PASSPHRASE", ShardcastConfig::file_path().display())
    })?;

    tracing::info!(
        mode = ?config.network.mode,
        listen = %config.network.listen_addr,
        creator = %config.channel.creator,
        "shardcastd starting"
    );

    let channel = Arc::new(
        Channel::from_config(&config, handlers())
            .await
            .context("failed to open channel")?,
    );

    // Shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let redundancy = config.channel.redundancy_percent;
    let heartbeat_task = tokio::spawn(heartbeat_loop(
        channel.clone(),
        config.channel.creator.clone(),
        redundancy,
        shutdown_tx.subscribe(),
    ));
    let stdin_task = tokio::spawn(stdin_loop(channel.clone(), redundancy, shutdown_tx.subscribe()));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = heartbeat_task      => tracing::error!("heartbeat task exited: {:?}", r),
        r = stdin_task          => tracing::error!("stdin task exited: {:?}", r),
    }

    let _ = shutdown_tx.send(());
    channel.close().await.context("closing channel")?;
    Ok(())
}
