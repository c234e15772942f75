//! Cryptographic primitives for shardcast.
//!
//! Provides three things:
//!   1. Passphrase key derivation with Argon2id
//!   2. The AES-256-GCM channel cipher that seals every datagram
//!   3. BLAKE3 digests, used to fingerprint payloads in logs
//!
//! Derived keys are held in `Zeroizing` buffers and wiped when dropped.
//! There is no unsafe code in this module.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::wire::{DatagramPrefix, Magic, MessageId, MESSAGE_ID_LEN, NONCE_LEN};

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

// ── Key derivation ────────────────────────────────────────────────────────────

pub const KEY_LEN: usize = 32;

/// Argon2 refuses salts shorter than this.
pub const MIN_PASSPHRASE_LEN: usize = 8;

const KDF_TIME_COST: u32 = 1;
const KDF_MEMORY_KIB: u32 = 64 * 1024;
const KDF_PARALLELISM: u32 = 4;

/// Derive the channel key from a shared passphrase.
///
/// Argon2id v0x13, one pass over 64 MiB with four lanes. Both the password
/// and the salt are the passphrase with its bytes reversed, so every peer
/// that knows the passphrase derives the same key with no salt exchange.
pub fn derive_key(passphrase: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    if passphrase.len() < MIN_PASSPHRASE_LEN {
        return Err(CryptoError::PassphraseTooShort(passphrase.len()));
    }

    let reversed: Zeroizing<Vec<u8>> = Zeroizing::new(passphrase.iter().rev().copied().collect());
    let params = Params::new(KDF_MEMORY_KIB, KDF_TIME_COST, KDF_PARALLELISM, Some(KEY_LEN))
        .map_err(CryptoError::Kdf)?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon
        .hash_password_into(&reversed, &reversed, &mut key[..])
        .map_err(CryptoError::Kdf)?;
    Ok(key)
}

// ── Randomness ────────────────────────────────────────────────────────────────

/// Generate a fresh 12-byte AES-GCM nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Generate a random id shared by all shards of one outgoing message.
pub fn generate_message_id() -> MessageId {
    let mut id = [0u8; MESSAGE_ID_LEN];
    rand::thread_rng().fill_bytes(&mut id);
    id
}

// ── Channel cipher ────────────────────────────────────────────────────────────

/// Symmetric AEAD shared by every peer on a channel.
///
/// Sealing draws a new random nonce per datagram and uses no associated
/// data. The cipher is stateless, so one instance may seal from several
/// tasks at once; clone it to give the receive loop its own copy.
#[derive(Clone)]
pub struct ChannelCipher {
    aead: Aes256Gcm,
}

impl ChannelCipher {
    /// Derive the channel key from a passphrase. Slow by design of Argon2;
    /// derive once per channel.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CryptoError> {
        let key = derive_key(passphrase.as_bytes())?;
        Ok(Self::from_key(&key))
    }

    /// Build a cipher from raw key bytes supplied by some other key source.
    pub fn from_key(key: &[u8; KEY_LEN]) -> Self {
        Self {
            aead: Aes256Gcm::new(GenericArray::from_slice(key)),
        }
    }

    /// Seal one shard into a complete datagram:
    ///   [magic][message_id][nonce][ciphertext + 16-byte tag]
    pub fn seal(
        &self,
        magic: Magic,
        message_id: MessageId,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let prefix = DatagramPrefix {
            magic,
            message_id,
            nonce: generate_nonce(),
        };
        let nonce = prefix.nonce;
        let ciphertext = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Seal)?;
        Ok(prefix.frame(&ciphertext))
    }

    /// Authenticate and decrypt the ciphertext that followed `prefix`.
    pub fn open(&self, prefix: &DatagramPrefix, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = prefix.nonce;
        self.aead
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailure)
    }
}

impl std::fmt::Debug for ChannelCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCipher").finish_non_exhaustive()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("passphrase is {0} bytes, need at least {MIN_PASSPHRASE_LEN}")]
    PassphraseTooShort(usize),

    #[error("key derivation failed: {0}")]
    Kdf(argon2::Error),

    #[error("datagram failed authentication")]
    AuthenticationFailure,

    #[error("AES-GCM seal failed")]
    Seal,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
