//! Inner payload framing
//!
//! The plaintext that gets compressed and encrypted is:
//! - metadata length: 4 bytes (little-endian u32)
//! - metadata: UTF-8 JSON `{"name": ..., "type": ...}`
//! - file bytes: the rest

use serde::Serialize;
use serde_json::Value;

use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};

/// Length of the metadata length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Name used when the payload carries no usable file name.
pub const DEFAULT_FILE_NAME: &str = "decrypted_file";

/// Media type used when the payload carries no usable media type.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// File name and media type carried inside the encrypted payload.
///
/// Field order matters: it fixes the JSON byte layout, which other
/// implementations produce as `{"name":"…","type":"…"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
}

impl FileMetadata {
    pub fn new(name: &str, mime_type: &str) -> Self {
        Self {
            name: Some(name.to_owned()),
            mime_type: Some(mime_type.to_owned()),
        }
    }

    /// Pick the fields out of any JSON value.
    ///
    /// Only an object carries fields. A string field is taken as is; a
    /// non-zero number or `true` is taken as its JSON text. Anything else
    /// counts as missing.
    fn from_json(value: &Value) -> Self {
        let field = |key: &str| value.get(key).and_then(scalar_text);
        Self {
            name: field("name"),
            mime_type: field("type"),
        }
    }

    /// The stored name, or the default when missing or empty.
    pub fn name_or_default(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_FILE_NAME,
        }
    }

    /// The stored media type, or the default when missing or empty.
    pub fn mime_type_or_default(&self) -> &str {
        match self.mime_type.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => DEFAULT_MIME_TYPE,
        }
    }
}

/// Outcome of reading a decrypted, decompressed body.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed<'a> {
    /// A well-formed frame: metadata plus the file bytes that follow it.
    Framed {
        metadata: FileMetadata,
        file: &'a [u8],
    },
    /// The body has no readable metadata frame. Callers treat the whole
    /// body as the file.
    Unframed,
}

/// Build the payload for `file`.
pub fn frame(metadata: &FileMetadata, file: &[u8]) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(metadata).map_err(|e| {
        LockboxError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "failed to serialize file metadata",
            e,
        )
    })?;
    let json_len = u32::try_from(json.len())
        .map_err(|_| LockboxError::invalid_input("file metadata too large"))?;

    let mut payload = Vec::with_capacity(LENGTH_PREFIX_LEN + json.len() + file.len());
    payload.extend_from_slice(&json_len.to_le_bytes());
    payload.extend_from_slice(&json);
    payload.extend_from_slice(file);
    Ok(payload)
}

/// Split a body into metadata and file bytes.
///
/// A length prefix that points past the end of the body is a format error.
/// A body too short to hold the prefix, or whose metadata is not JSON at
/// all, is [`Parsed::Unframed`] rather than an error. Metadata bytes that
/// are not valid UTF-8 are read with replacement characters first.
pub fn parse(body: &[u8]) -> Result<Parsed<'_>> {
    let Some((prefix, rest)) = body.split_first_chunk::<LENGTH_PREFIX_LEN>() else {
        return Ok(Parsed::Unframed);
    };

    let meta_len = u32::from_le_bytes(*prefix) as usize;
    if meta_len > rest.len() {
        return Err(LockboxError::format(
            "metadata length points past the end of the payload",
        ));
    }

    let (meta, file) = rest.split_at(meta_len);
    let text = String::from_utf8_lossy(meta);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&*text);
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Ok(Parsed::Framed {
            metadata: FileMetadata::from_json(&value),
            file,
        }),
        Err(_) => Ok(Parsed::Unframed),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_owned()),
        _ => None,
    }
}
