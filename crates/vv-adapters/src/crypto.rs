//! Envelope encryption primitives
//!
//! The envelope encryption pattern:
//! 1. Generate a 256-bit data encryption key (DEK) per voice entry
//! 2. Encrypt content with the DEK using AES-256-GCM
//! 3. Wrap the DEK with the process-wide key encryption key (KEK)
//! 4. Store wrapped DEKs beside the ciphertext; destroying a DEK makes all
//!    of its ciphertext permanently unreadable
//!
//! Ciphertext framing on disk: `version (1) || nonce (12) || tag (16) || body`.
//! Every ciphertext is bound through associated data to the string
//! `"<field_tag>:<voice_entry_id>"`, so a ciphertext cannot be moved to
//! another row or column without failing authentication. Wrapped DEKs use the
//! same frame with associated data `"dek:<voice_entry_id>"`.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use vv_ports::PlaintextDek;

/// Frame layout constants.
pub const ENVELOPE_VERSION: u8 = 1;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN + TAG_LEN;

/// Length of the wrapped-DEK sentinel written on destroy. Random bytes of
/// this length never parse as a valid frame.
pub const SENTINEL_LEN: usize = 32;

/// Crypto failure modes. Both are fatal for the caller.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Ciphertext is invalid or has been tampered with")]
    InvalidCiphertext,

    #[error("Key unavailable: {message}")]
    KeyUnavailable { message: String },
}

/// The process-wide key encryption key, read once at startup.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Kek {
    key: [u8; 32],
    #[zeroize(skip)]
    version: String,
}

impl Kek {
    /// Construct from raw bytes and an encryption-provider version tag
    /// (e.g. `local-v1`).
    pub fn from_bytes(key: [u8; 32], version: &str) -> Self {
        Self {
            key,
            version: version.to_string(),
        }
    }

    /// Construct from the base64 form used in configuration.
    pub fn from_base64(encoded: &str, version: &str) -> Result<Self, CryptoError> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::KeyUnavailable {
                message: "master KEK is not valid base64".to_string(),
            })?;
        let key: [u8; 32] = decoded.try_into().map_err(|_| CryptoError::KeyUnavailable {
            message: "master KEK must be exactly 32 bytes".to_string(),
        })?;
        Ok(Self::from_bytes(key, version))
    }

    /// Encryption-provider version tag recorded on DEK rows.
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// The set of KEKs the process can unwrap with, keyed by version tag.
///
/// New DEKs wrap under the active KEK. Rotation re-wraps an existing DEK
/// under any named key in the ring, so ciphertext protection can move off a
/// compromised or retired KEK while old rows stay readable until they are
/// rotated too. Lookups resolve by each KEK's version tag; the first match
/// wins, so tags must be unique.
pub struct KekRing {
    keks: Vec<Kek>,
}

impl KekRing {
    /// A ring with a single key, which is also the active one.
    pub fn new(active: Kek) -> Self {
        Self { keks: vec![active] }
    }

    /// Add a non-active key (a previous or standby KEK).
    pub fn with_kek(mut self, kek: Kek) -> Self {
        self.keks.push(kek);
        self
    }

    /// The KEK new DEKs wrap under.
    pub fn active(&self) -> &Kek {
        &self.keks[0]
    }

    /// Resolve a KEK by its version tag.
    pub fn get(&self, version: &str) -> Option<&Kek> {
        self.keks.iter().find(|k| k.version() == version)
    }
}

/// Generate a fresh random DEK.
pub fn generate_dek() -> PlaintextDek {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    PlaintextDek(key)
}

/// Generate a random nonce.
fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Random bytes written over a destroyed DEK row. Never unwraps.
pub fn random_sentinel() -> Vec<u8> {
    let mut sentinel = vec![0u8; SENTINEL_LEN];
    OsRng.fill_bytes(&mut sentinel);
    sentinel
}

fn seal(key: &[u8; 32], plaintext: &[u8], associated_data: &str) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyUnavailable {
        message: "cipher construction failed".to_string(),
    })?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let sealed = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: associated_data.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::InvalidCiphertext)?;

    // AES-GCM appends the tag to the body; the frame carries it explicitly.
    let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut framed = Vec::with_capacity(HEADER_LEN + body.len());
    framed.push(ENVELOPE_VERSION);
    framed.extend_from_slice(&nonce_bytes);
    framed.extend_from_slice(tag);
    framed.extend_from_slice(body);
    Ok(framed)
}

fn open(key: &[u8; 32], framed: &[u8], associated_data: &str) -> Result<Vec<u8>, CryptoError> {
    if framed.len() < HEADER_LEN || framed[0] != ENVELOPE_VERSION {
        return Err(CryptoError::InvalidCiphertext);
    }

    let nonce = Nonce::from_slice(&framed[1..1 + NONCE_LEN]);
    let tag = &framed[1 + NONCE_LEN..HEADER_LEN];
    let body = &framed[HEADER_LEN..];

    let mut sealed = Vec::with_capacity(body.len() + TAG_LEN);
    sealed.extend_from_slice(body);
    sealed.extend_from_slice(tag);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyUnavailable {
        message: "cipher construction failed".to_string(),
    })?;

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &sealed,
                aad: associated_data.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::InvalidCiphertext)
}

/// Encrypt content under a DEK, bound to its owning field and entry.
pub fn encrypt(
    plaintext: &[u8],
    dek: &PlaintextDek,
    associated_data: &str,
) -> Result<Vec<u8>, CryptoError> {
    seal(dek.as_bytes(), plaintext, associated_data)
}

/// Decrypt content under a DEK. Fails with `InvalidCiphertext` on tampering
/// or an associated-data mismatch.
pub fn decrypt(
    ciphertext: &[u8],
    dek: &PlaintextDek,
    associated_data: &str,
) -> Result<Vec<u8>, CryptoError> {
    open(dek.as_bytes(), ciphertext, associated_data)
}

/// Wrap a DEK under the KEK.
pub fn wrap_dek(dek: &PlaintextDek, kek: &Kek, associated_data: &str) -> Result<Vec<u8>, CryptoError> {
    seal(&kek.key, dek.as_bytes(), associated_data)
}

/// Unwrap a DEK. A tombstone sentinel or tampered blob fails with
/// `InvalidCiphertext`.
pub fn unwrap_dek(
    wrapped: &[u8],
    kek: &Kek,
    associated_data: &str,
) -> Result<PlaintextDek, CryptoError> {
    let mut opened = open(&kek.key, wrapped, associated_data)?;
    let key: [u8; 32] = opened
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidCiphertext)?;
    opened.zeroize();
    Ok(PlaintextDek(key))
}

/// Associated-data string for a wrapped DEK row.
pub fn dek_associated_data(voice_entry_id: uuid::Uuid) -> String {
    format!("dek:{voice_entry_id}")
}
