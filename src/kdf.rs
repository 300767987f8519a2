//! Password-based key derivation
//!
//! PBKDF2-HMAC-SHA256 with a fixed iteration count. The salt is stored in
//! the clear in every container, so the only secret input is the password.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of derived key in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// PBKDF2 iteration count. Changing this breaks every existing container.
pub const PBKDF2_ROUNDS: u32 = 100_000;

/// Derive a 32-byte key from a password and salt.
///
/// Never fails: a wrong password still yields a key, and is only caught
/// when the AEAD tag does not verify.
pub fn derive_key(password: &[u8], salt: &[u8; SALT_LEN]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ROUNDS, &mut key[..]);
    key
}
