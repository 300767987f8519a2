//! AES-256-GCM sealing and opening
//!
//! The 16-byte tag is appended to the ciphertext (the `aes-gcm` crate's
//! convention). No associated data is used.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};
use crate::kdf::KEY_LEN;

/// Length of nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Length of the authentication tag appended to every ciphertext
pub const TAG_LEN: usize = 16;

fn cipher(key: &[u8; KEY_LEN]) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
}

/// Encrypt `plaintext`, returning ciphertext || tag.
pub fn seal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    cipher(key)
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| {
            // Only reachable for inputs beyond the GCM length limit (~64 GiB).
            LockboxError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "encryption failed",
            )
        })
}

/// Decrypt and verify ciphertext || tag.
///
/// Every failure, whether from a wrong key, a flipped bit, or a truncated
/// tag, comes back as the same authentication error. No plaintext is
/// released unless the tag verifies.
pub fn open(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], sealed: &[u8]) -> Result<Vec<u8>> {
    cipher(key)
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| LockboxError::authentication())
}
