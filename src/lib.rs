//! lockbox - password-protected, self-describing file containers
//!
//! A container is `salt(16) || nonce(12) || flag(1) || AES-256-GCM ciphertext`,
//! keyed by PBKDF2-HMAC-SHA256 over the password and salt. The encrypted
//! payload carries the original file name and media type alongside the bytes.

#![forbid(unsafe_code)]

pub mod aead;
pub mod compress;
pub mod container;
pub mod error;
pub mod file_ops;
pub mod kdf;
pub mod passphrase;
pub mod payload;

pub use container::{DecodedFile, MetadataSource, decode, decode_named, encode};
pub use error::{ErrorCategory, ErrorKind, LockboxError, Result};
