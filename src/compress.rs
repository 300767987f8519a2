//! Optional gzip pass over the payload
//!
//! Whether a container is compressed is recorded in its flag byte. Decoding
//! looks only at that byte, never at how the caller is configured.

use crate::error::Result;

/// Flag byte stored at offset 28 of every container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFlag {
    /// Payload stored as-is.
    None,
    /// Payload is a gzip member.
    Gzip,
}

impl CompressionFlag {
    pub fn to_byte(self) -> u8 {
        match self {
            CompressionFlag::None => 0,
            CompressionFlag::Gzip => 1,
        }
    }

    /// Only `1` means gzip. Unknown values are read as uncompressed, which
    /// is how older readers have always treated them.
    pub fn from_byte(byte: u8) -> Self {
        if byte == 1 {
            CompressionFlag::Gzip
        } else {
            CompressionFlag::None
        }
    }
}

/// Whether this build can produce gzip containers.
pub const fn gzip_available() -> bool {
    cfg!(feature = "gzip")
}

/// Compress `payload` if asked to and able to.
///
/// Lack of a compressor is not an error: the payload passes through and the
/// returned flag says so.
pub fn compress(payload: Vec<u8>, requested: bool) -> Result<(Vec<u8>, CompressionFlag)> {
    if !requested {
        return Ok((payload, CompressionFlag::None));
    }
    if !gzip_available() {
        tracing::debug!("gzip unavailable in this build; storing payload uncompressed");
        return Ok((payload, CompressionFlag::None));
    }
    let body = gzip::encode(&payload)?;
    tracing::debug!(
        before = payload.len(),
        after = body.len(),
        "compressed payload"
    );
    Ok((body, CompressionFlag::Gzip))
}

/// Undo whatever `flag` says was applied.
pub fn decompress(body: Vec<u8>, flag: CompressionFlag) -> Result<Vec<u8>> {
    match flag {
        CompressionFlag::None => Ok(body),
        CompressionFlag::Gzip => gzip::decode(&body),
    }
}

#[cfg(feature = "gzip")]
mod gzip {
    use std::io::{Read, Write};

    use flate2::Compression;
    use flate2::read::GzDecoder;
    use flate2::write::GzEncoder;

    use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};

    pub(super) fn encode(input: &[u8]) -> Result<Vec<u8>> {
        let failed = |e| {
            LockboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "gzip compression failed",
                e,
            )
        };
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(input).map_err(failed)?;
        enc.finish().map_err(failed)
    }

    pub(super) fn decode(input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        GzDecoder::new(input).read_to_end(&mut out).map_err(|e| {
            LockboxError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Integrity,
                "decompression failed",
                e,
            )
        })?;
        Ok(out)
    }
}

#[cfg(not(feature = "gzip"))]
mod gzip {
    use crate::error::{LockboxError, Result};

    pub(super) fn encode(_input: &[u8]) -> Result<Vec<u8>> {
        Err(LockboxError::integrity("gzip support not compiled in"))
    }

    pub(super) fn decode(_input: &[u8]) -> Result<Vec<u8>> {
        Err(LockboxError::integrity(
            "container is gzip-compressed but gzip support is not compiled in",
        ))
    }
}
