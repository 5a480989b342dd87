//! Authenticated encryption of single field values.
//!
//! ## Envelope
//!
//! Every encrypted value is a self-describing string:
//!
//! ```text
//! nonce_hex:tag_hex:ciphertext_hex
//! ```
//!
//! The nonce is fresh randomness from the OS for every call. New values use a
//! 96-bit nonce; envelopes with a 128-bit nonce (written by the previous
//! relayer) are still accepted on decrypt.
//!
//! ## Key
//!
//! The AES-256 key is derived with scrypt from one secret and a fixed,
//! versioned salt label. Derivation is lazy: a missing secret does not stop the
//! process from starting, but every encrypt/decrypt call fails with
//! [`CryptoError::MissingSecret`].

use std::fmt;
use std::sync::OnceLock;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::{Aes256Gcm, AesGcm, Key, Nonce};
use thiserror::Error;
use tracing::debug;

/// Salt label for key derivation. Changing it orphans every stored row.
pub const SALT_LABEL: &[u8] = b"darx-salt-v1";

/// scrypt cost parameters: N = 2^14, r = 8, p = 1
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const LEGACY_NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// AES-256-GCM with the 16-byte IV the previous relayer used.
type LegacyAes256Gcm = AesGcm<Aes256, U16>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("relayer secret is not configured")]
    MissingSecret,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("malformed envelope: {0}")]
    Malformed(&'static str),

    #[error("authentication tag mismatch")]
    Authentication,

    #[error("field {field} is unreadable")]
    CorruptField { field: &'static str },
}

struct Keys {
    current: Aes256Gcm,
    legacy: LegacyAes256Gcm,
}

/// Field-level AEAD cipher.
///
/// Cheap to share behind an `Arc`; the key is derived at most once per
/// instance.
pub struct FieldCipher {
    secret: Option<String>,
    keys: OnceLock<Keys>,
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher")
            .field("configured", &self.secret.is_some())
            .field("derived", &self.keys.get().is_some())
            .finish()
    }
}

impl FieldCipher {
    /// Create a cipher for `secret`. No work happens until first use.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            keys: OnceLock::new(),
        }
    }

    /// Whether a secret was supplied
    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    fn keys(&self) -> Result<&Keys, CryptoError> {
        let secret = self.secret.as_deref().ok_or(CryptoError::MissingSecret)?;
        if let Some(keys) = self.keys.get() {
            return Ok(keys);
        }

        let raw = derive_key(secret)?;
        let key = Key::<Aes256Gcm>::from_slice(&raw);
        Ok(self.keys.get_or_init(|| {
            debug!("field encryption key derived");
            Keys {
                current: Aes256Gcm::new(key),
                legacy: LegacyAes256Gcm::new(key),
            }
        }))
    }

    /// Encrypt one value into a `nonce:tag:ciphertext` envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let keys = self.keys()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        // aes-gcm appends the tag to the ciphertext
        let mut sealed = keys
            .current
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(sealed)
        ))
    }

    /// Decrypt an envelope produced by [`FieldCipher::encrypt`].
    pub fn decrypt(&self, envelope: &str) -> Result<String, CryptoError> {
        let keys = self.keys()?;
        let parts = Envelope::parse(envelope)?;

        let mut payload = parts.ciphertext;
        payload.extend_from_slice(&parts.tag);

        let plain = match parts.nonce.len() {
            NONCE_LEN => keys
                .current
                .decrypt(Nonce::from_slice(&parts.nonce), payload.as_ref()),
            LEGACY_NONCE_LEN => keys.legacy.decrypt(
                aes_gcm::aead::generic_array::GenericArray::from_slice(&parts.nonce),
                payload.as_ref(),
            ),
            _ => return Err(CryptoError::Malformed("nonce length")),
        }
        .map_err(|_| CryptoError::Authentication)?;

        String::from_utf8(plain).map_err(|_| CryptoError::Malformed("utf-8"))
    }
}

/// Decoded envelope parts
struct Envelope {
    nonce: Vec<u8>,
    tag: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl Envelope {
    fn parse(s: &str) -> Result<Self, CryptoError> {
        let mut parts = s.split(':');
        let (Some(nonce), Some(tag), Some(ct), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::Malformed("expected nonce:tag:ciphertext"));
        };

        let nonce = hex::decode(nonce).map_err(|_| CryptoError::Malformed("nonce hex"))?;
        let tag = hex::decode(tag).map_err(|_| CryptoError::Malformed("tag hex"))?;
        let ciphertext = hex::decode(ct).map_err(|_| CryptoError::Malformed("ciphertext hex"))?;

        if tag.len() != TAG_LEN {
            return Err(CryptoError::Malformed("tag length"));
        }
        Ok(Self { nonce, tag, ciphertext })
    }
}

fn derive_key(secret: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let mut out = [0u8; KEY_LEN];
    scrypt::scrypt(secret.as_bytes(), SALT_LABEL, &params, &mut out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(out)
}

// ============================================================================
// Unit Tests
// ============================================================================
