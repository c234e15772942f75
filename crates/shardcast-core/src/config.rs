//! Configuration system for shardcast.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SHARDCAST_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/shardcast/config.toml
//!   3. ~/.config/shardcast/config.toml

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::crypto::MIN_PASSPHRASE_LEN;
use crate::fec::parity_shards;
use crate::wire::{
    DEFAULT_PORT, MAX_SHARDS_PER_SEGMENT, MAX_UDP_PAYLOAD, MIN_DATAGRAM_SIZE, SEGMENT_SIZE,
    SHARD_SIZE,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardcastConfig {
    pub channel: ChannelSettings,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Name stamped on every delivery from this channel.
    pub creator: String,
    /// Shared secret. Every peer on the channel must use the same one.
    pub passphrase: String,
    /// Largest datagram the receive loop will read.
    pub max_datagram_size: usize,
    /// SO_RCVBUF / SO_SNDBUF in bytes. 0 = leave the OS default.
    pub socket_buffer_size: usize,
    /// Parity shards as a percentage of data shards.
    pub redundancy_percent: u32,
    /// Shards a message must accumulate before decoding is attempted.
    pub decode_threshold: usize,
    /// Decoded messages holding more shards than this are swept early.
    pub sweep_min_shards: usize,
    /// Forget messages that have seen no shard for this long.
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Point-to-point: listen on `listen_addr`, send to `send_addr`.
    Unicast,
    /// Join the all-hosts multicast group on the `listen_addr` port.
    Broadcast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mode: ChannelMode,
    pub listen_addr: SocketAddr,
    /// Unicast destination. Ignored in broadcast mode.
    pub send_addr: SocketAddr,
    /// Interface to join the multicast group on. 0.0.0.0 = let the OS pick.
    pub multicast_interface: Ipv4Addr,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            creator: "shardcast".into(),
            passphrase: String::new(),
            max_datagram_size: 2048,
            socket_buffer_size: 4 * 1024 * 1024,
            redundancy_percent: 50,
            decode_threshold: 3,
            sweep_min_shards: 8,
            idle_timeout_secs: 30,
            sweep_interval_secs: 5,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mode: ChannelMode::Unicast,
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            send_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            multicast_interface: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl ChannelSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Reject settings the channel cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.passphrase.len() < MIN_PASSPHRASE_LEN {
            return Err(ConfigError::Invalid(format!(
                "channel.passphrase must be at least {MIN_PASSPHRASE_LEN} bytes"
            )));
        }
        self.validate_runtime()
    }

    /// Checks for everything a running channel depends on, leaving out the
    /// passphrase so channels built from a ready-made key can use it too.
    pub fn validate_runtime(&self) -> Result<(), ConfigError> {
        if !(MIN_DATAGRAM_SIZE..=MAX_UDP_PAYLOAD).contains(&self.max_datagram_size) {
            return Err(ConfigError::Invalid(format!(
                "channel.max_datagram_size must be within {MIN_DATAGRAM_SIZE}..={MAX_UDP_PAYLOAD}"
            )));
        }
        let full_segment = SEGMENT_SIZE / SHARD_SIZE;
        if full_segment + parity_shards(full_segment, self.redundancy_percent)
            > MAX_SHARDS_PER_SEGMENT
        {
            return Err(ConfigError::Invalid(format!(
                "channel.redundancy_percent {} exceeds {MAX_SHARDS_PER_SEGMENT} shards per segment",
                self.redundancy_percent
            )));
        }
        if self.decode_threshold == 0 {
            return Err(ConfigError::Invalid("channel.decode_threshold must be > 0".into()));
        }
        if self.idle_timeout_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "channel.idle_timeout_secs and channel.sweep_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("shardcast")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ShardcastConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            ShardcastConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SHARDCAST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    pub fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&ShardcastConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channel.validate()
    }

    /// Apply SHARDCAST_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Values that fail to parse are
    /// ignored and the previous setting kept.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(v: Option<String>, slot: &mut T) {
            if let Some(p) = v.and_then(|v| v.parse().ok()) {
                *slot = p;
            }
        }

        if let Some(v) = lookup("SHARDCAST_CHANNEL__CREATOR") {
            self.channel.creator = v;
        }
        if let Some(v) = lookup("SHARDCAST_CHANNEL__PASSPHRASE") {
            self.channel.passphrase = v;
        }
        parsed(lookup("SHARDCAST_CHANNEL__MAX_DATAGRAM_SIZE"), &mut self.channel.max_datagram_size);
        parsed(lookup("SHARDCAST_CHANNEL__SOCKET_BUFFER_SIZE"), &mut self.channel.socket_buffer_size);
        parsed(lookup("SHARDCAST_CHANNEL__REDUNDANCY_PERCENT"), &mut self.channel.redundancy_percent);
        parsed(lookup("SHARDCAST_CHANNEL__DECODE_THRESHOLD"), &mut self.channel.decode_threshold);
        parsed(lookup("SHARDCAST_CHANNEL__SWEEP_MIN_SHARDS"), &mut self.channel.sweep_min_shards);
        parsed(lookup("SHARDCAST_CHANNEL__IDLE_TIMEOUT_SECS"), &mut self.channel.idle_timeout_secs);
        parsed(lookup("SHARDCAST_CHANNEL__SWEEP_INTERVAL_SECS"), &mut self.channel.sweep_interval_secs);

        if let Some(v) = lookup("SHARDCAST_NETWORK__MODE") {
            match v.as_str() {
                "unicast" => self.network.mode = ChannelMode::Unicast,
                "broadcast" => self.network.mode = ChannelMode::Broadcast,
                _ => {}
            }
        }
        parsed(lookup("SHARDCAST_NETWORK__LISTEN_ADDR"), &mut self.network.listen_addr);
        parsed(lookup("SHARDCAST_NETWORK__SEND_ADDR"), &mut self.network.send_addr);
        parsed(
            lookup("SHARDCAST_NETWORK__MULTICAST_INTERFACE"),
            &mut self.network.multicast_interface,
        );
    }
}
