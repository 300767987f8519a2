//! Container encoding and decoding
//!
//! A container is a self-describing encrypted file. The binary format is:
//! - salt: 16 bytes
//! - nonce: 12 bytes
//! - compression flag: 1 byte (0 = raw, 1 = gzip)
//! - ciphertext: variable length (includes 16-byte GCM tag)
//!
//! The ciphertext decrypts to the payload described in [`crate::payload`],
//! gzip-compressed first when the flag says so.

use rand::RngCore;
use rand::rngs::OsRng;

use crate::aead::{self, NONCE_LEN};
use crate::compress::{self, CompressionFlag};
use crate::error::{LockboxError, Result};
use crate::kdf::{self, SALT_LEN};
use crate::payload::{self, DEFAULT_FILE_NAME, DEFAULT_MIME_TYPE, FileMetadata, Parsed};

/// Offset of the compression flag byte
pub const FLAG_OFFSET: usize = SALT_LEN + NONCE_LEN;

/// Length of the unencrypted header; also the shortest acceptable container
pub const HEADER_LEN: usize = FLAG_OFFSET + 1;

/// Extension conventionally given to container files
pub const CONTAINER_EXTENSION: &str = ".enc";

/// The unencrypted part of a container. None of it is secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub flag_byte: u8,
}

impl Header {
    pub fn compression(&self) -> CompressionFlag {
        CompressionFlag::from_byte(self.flag_byte)
    }
}

/// Where the recovered name and media type came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    /// Read from the metadata frame inside the payload.
    Embedded,
    /// The payload had no readable metadata frame; the name was made up
    /// from the container's own file name.
    Fallback,
}

/// A file recovered from a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFile {
    pub data: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub metadata_source: MetadataSource,
}

/// Split off and return the header, rejecting anything shorter than
/// [`HEADER_LEN`] before any cryptography runs.
pub fn read_header(container: &[u8]) -> Result<(Header, &[u8])> {
    let Some((header, ciphertext)) = container.split_first_chunk::<HEADER_LEN>() else {
        return Err(LockboxError::format(format!(
            "container is {} bytes; at least {} are required",
            container.len(),
            HEADER_LEN
        )));
    };

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&header[..SALT_LEN]);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&header[SALT_LEN..FLAG_OFFSET]);

    Ok((
        Header {
            salt,
            nonce,
            flag_byte: header[FLAG_OFFSET],
        },
        ciphertext,
    ))
}

/// Encrypt a file under `password` with a fresh random salt and nonce.
///
/// If `compress` is set but this build has no gzip support, the container
/// is written uncompressed and its flag says so.
pub fn encode(
    file: &[u8],
    file_name: &str,
    mime_type: &str,
    password: &[u8],
    compress: bool,
) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    encode_deterministic(file, file_name, mime_type, password, compress, &salt, &nonce)
}

/// Encrypt a file using the provided salt and nonce.
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encode()` which generates random salt/nonce.
pub fn encode_deterministic(
    file: &[u8],
    file_name: &str,
    mime_type: &str,
    password: &[u8],
    compress: bool,
    salt: &[u8; SALT_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    require_password(password)?;

    let metadata = FileMetadata::new(file_name, mime_type);
    let payload = payload::frame(&metadata, file)?;
    let (body, flag) = compress::compress(payload, compress)?;

    let key = kdf::derive_key(password, salt);
    let ciphertext = aead::seal(&key, nonce, &body)?;

    let mut output = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    output.extend_from_slice(salt);
    output.extend_from_slice(nonce);
    output.push(flag.to_byte());
    output.extend_from_slice(&ciphertext);

    tracing::debug!(
        file_len = file.len(),
        container_len = output.len(),
        compressed = (flag == CompressionFlag::Gzip),
        "encoded container"
    );
    Ok(output)
}

/// Decrypt a container with no external file name to fall back on.
pub fn decode(container: &[u8], password: &[u8]) -> Result<DecodedFile> {
    decode_named(container, password, None)
}

/// Decrypt a container.
///
/// `container_name` is the container's own file name, if it has one. It
/// is only consulted when the payload has no readable metadata, to make up
/// a name for the recovered file.
pub fn decode_named(
    container: &[u8],
    password: &[u8],
    container_name: Option<&str>,
) -> Result<DecodedFile> {
    let (header, ciphertext) = read_header(container)?;
    require_password(password)?;

    let key = kdf::derive_key(password, &header.salt);
    let body = aead::open(&key, &header.nonce, ciphertext)?;
    let mut body = compress::decompress(body, header.compression())?;

    let embedded = match payload::parse(&body)? {
        Parsed::Framed { metadata, file } => Some((metadata, body.len() - file.len())),
        Parsed::Unframed => None,
    };

    let decoded = match embedded {
        Some((metadata, file_start)) => {
            let file_name = metadata.name_or_default().to_owned();
            let mime_type = metadata.mime_type_or_default().to_owned();
            body.drain(..file_start);
            DecodedFile {
                data: body,
                file_name,
                mime_type,
                metadata_source: MetadataSource::Embedded,
            }
        }
        None => {
            tracing::warn!(
                body_len = body.len(),
                "container has no readable metadata; returning raw content"
            );
            DecodedFile {
                data: body,
                file_name: fallback_file_name(container_name),
                mime_type: DEFAULT_MIME_TYPE.to_owned(),
                metadata_source: MetadataSource::Fallback,
            }
        }
    };

    tracing::debug!(
        container_len = container.len(),
        file_len = decoded.data.len(),
        compressed = (header.compression() == CompressionFlag::Gzip),
        "decoded container"
    );
    Ok(decoded)
}

/// Name given to a file recovered without metadata.
///
/// `report.pdf.enc` becomes `decrypted_report.pdf`. Without a container
/// name the generic default is used.
pub fn fallback_file_name(container_name: Option<&str>) -> String {
    match container_name {
        Some(name) if !name.is_empty() => {
            let stem = name.strip_suffix(CONTAINER_EXTENSION).unwrap_or(name);
            format!("decrypted_{stem}")
        }
        _ => DEFAULT_FILE_NAME.to_owned(),
    }
}

fn require_password(password: &[u8]) -> Result<()> {
    if password.is_empty() {
        return Err(LockboxError::invalid_input("password must not be empty"));
    }
    Ok(())
}
