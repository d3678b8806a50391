// Anchor tokens: stable position references for annotation spans.
//
// Two encodings share one opaque token type:
//
//   abs.<base64>   absolute (block_id, offset) pair, decodable locally
//   crdt.<base64>  CRDT cursor payload, resolvable only by the runtime
//
// Decoding is total: malformed or orphaned tokens decode to `None`, never
// an error. An absolute token that decodes to a different block than the
// span declares is treated as unresolved by the resolver, not corrected.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::BlockId;

/// Maximum UTF-8 byte length for a block id in the compact binary encoding.
pub const MAX_BLOCK_ID_LEN: usize = u8::MAX as usize;

const ABS_PREFIX: &str = "abs.";
const CRDT_PREFIX: &str = "crdt.";
const ABS_VERSION: u8 = 1;
const ABS_FIXED_BYTES: usize = 6; // version (1) + block_id len (1) + offset (4)

/// An opaque, serializable position anchor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct AnchorToken(String);

impl AnchorToken {
    /// Wrap a raw token string (e.g. read back from storage).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with(ABS_PREFIX)
    }

    pub fn is_cursor(&self) -> bool {
        self.0.starts_with(CRDT_PREFIX)
    }

    /// Wrap a runtime-produced cursor payload into a token.
    pub fn cursor(payload: &[u8]) -> Self {
        Self(format!("{CRDT_PREFIX}{}", URL_SAFE_NO_PAD.encode(payload)))
    }

    /// Extract the binary payload of a cursor token. `None` for absolute or
    /// malformed tokens.
    pub fn cursor_payload(&self) -> Option<Vec<u8>> {
        let encoded = self.0.strip_prefix(CRDT_PREFIX)?;
        URL_SAFE_NO_PAD.decode(encoded).ok()
    }
}

impl fmt::Display for AnchorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded anchor position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorPos {
    pub block_id: BlockId,
    pub offset: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnchorEncodeError {
    #[error("block id is {len} bytes, exceeds maximum of {max}")]
    BlockIdTooLong { len: usize, max: usize },
}

/// Encode an absolute `(block_id, offset)` anchor.
///
/// Layout of the base64 payload:
/// - byte 0: encoding version
/// - byte 1: block id byte length (0..=255)
/// - bytes 2..(2+len): UTF-8 block id
/// - final 4 bytes: offset (little-endian u32)
pub fn encode_absolute(block_id: &str, offset: u32) -> Result<AnchorToken, AnchorEncodeError> {
    let id_bytes = block_id.as_bytes();
    if id_bytes.len() > MAX_BLOCK_ID_LEN {
        return Err(AnchorEncodeError::BlockIdTooLong { len: id_bytes.len(), max: MAX_BLOCK_ID_LEN });
    }

    let mut payload = Vec::with_capacity(ABS_FIXED_BYTES + id_bytes.len());
    payload.push(ABS_VERSION);
    payload.push(id_bytes.len() as u8);
    payload.extend_from_slice(id_bytes);
    payload.extend_from_slice(&offset.to_le_bytes());
    Ok(AnchorToken(format!("{ABS_PREFIX}{}", URL_SAFE_NO_PAD.encode(payload))))
}

/// Decode an absolute anchor token. `None` for cursor tokens, unknown
/// versions, or any malformed payload.
pub fn decode_absolute(token: &AnchorToken) -> Option<AnchorPos> {
    let encoded = token.0.strip_prefix(ABS_PREFIX)?;
    let payload = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    if payload.len() < ABS_FIXED_BYTES || payload[0] != ABS_VERSION {
        return None;
    }

    let id_len = payload[1] as usize;
    if payload.len() != ABS_FIXED_BYTES + id_len {
        return None;
    }

    let block_id = std::str::from_utf8(&payload[2..2 + id_len]).ok()?.to_string();
    let offset_bytes: [u8; 4] = payload[2 + id_len..].try_into().ok()?;
    Some(AnchorPos { block_id, offset: u32::from_le_bytes(offset_bytes) })
}
