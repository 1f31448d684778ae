//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! The authenticated envelope wire format and its structural codec.
//!
//! Envelopes are JSON objects carrying AES-256-GCM ciphertext between peers.
//! The `iv` is AEAD-internal and always 12 bytes; the `nonce` is a separate
//! 12–32 byte random anti-replay token the relay stores only as a hash. The
//! two are never interchangeable.
//!
//! [`validate_structure`] performs shape validation only: field presence,
//! JSON types, encodings, and length contracts. Business rules (sequence
//! monotonicity, chunk-set completeness, freshness) belong to the replay
//! guard and the file pipeline.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

/// AES-256-GCM initialization vector length in bytes.
pub const IV_LEN: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Minimum decoded length of the anti-replay nonce.
pub const NONCE_MIN_LEN: usize = 12;

/// Maximum decoded length of the anti-replay nonce.
pub const NONCE_MAX_LEN: usize = 32;

/// Session identifiers are 32 lowercase hex characters (16 bytes).
pub const SESSION_ID_LEN: usize = 32;

/// Fixed plaintext chunk size for file transfer (256 KiB).
pub const CHUNK_SIZE: usize = 262_144;

/// Default pre-encryption file size cap (100 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Structural validation failures surfaced by the codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("field has invalid type or value: {0}")]
    InvalidType(String),

    #[error("field is not valid base64: {0}")]
    InvalidEncoding(String),

    #[error("iv must decode to {IV_LEN} bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("authTag must decode to {TAG_LEN} bytes, got {0}")]
    InvalidAuthTagLength(usize),

    #[error("nonce must decode to {NONCE_MIN_LEN}..={NONCE_MAX_LEN} bytes, got {0}")]
    InvalidNonceLength(usize),

    #[error("chunk index space is empty: totalChunks must be positive")]
    InvalidChunkIndex,
}

/// Envelope discriminator. Key-exchange messages have their own wire types
/// (`KEP_INIT` / `KEP_RESPONSE`); anything else is rejected at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeType {
    #[serde(rename = "MSG")]
    Msg,
    #[serde(rename = "FILE_META")]
    FileMeta,
    #[serde(rename = "FILE_CHUNK")]
    FileChunk,
}

impl EnvelopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeType::Msg => "MSG",
            EnvelopeType::FileMeta => "FILE_META",
            EnvelopeType::FileChunk => "FILE_CHUNK",
        }
    }
}

/// Cleartext descriptor attached to `FILE_META` envelopes.
///
/// The authoritative copy of this data travels encrypted inside the
/// `FILE_META` ciphertext; the envelope-level copy lets the relay account for
/// transfers without seeing file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub filename: String,
    pub size: u64,
    pub total_chunks: u32,
    pub mimetype: String,
}

/// Position descriptor attached to `FILE_CHUNK` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMeta {
    pub chunk_index: u32,
    pub total_chunks: u32,
}

/// Typed `meta` payload; the two shapes are disjoint so untagged
/// deserialization is unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeMeta {
    File(FileMeta),
    Chunk(ChunkMeta),
}

/// An authenticated envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    pub session_id: String,
    pub sender: String,
    pub receiver: String,
    /// Base64 (standard, padded) AEAD ciphertext.
    pub ciphertext: String,
    /// Base64 of the 12-byte AEAD IV.
    pub iv: String,
    /// Base64 of the 16-byte AEAD tag.
    pub auth_tag: String,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: i64,
    /// Per-sender sequence number, strictly increasing within a session.
    pub seq: u64,
    /// Base64 of the 12–32 byte anti-replay token.
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EnvelopeMeta>,
}

impl Envelope {
    /// The relay-side correlation id: `<sessionId>:<seq>:<timestamp>`.
    pub fn message_id(&self) -> String {
        format!("{}:{}:{}", self.session_id, self.seq, self.timestamp)
    }

    pub fn decode_ciphertext(&self) -> Result<Vec<u8>, StructuralError> {
        BASE64
            .decode(&self.ciphertext)
            .map_err(|_| StructuralError::InvalidEncoding("ciphertext".into()))
    }

    pub fn decode_iv(&self) -> Result<[u8; IV_LEN], StructuralError> {
        let bytes = BASE64
            .decode(&self.iv)
            .map_err(|_| StructuralError::InvalidEncoding("iv".into()))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| StructuralError::InvalidIvLength(bytes.len()))
    }

    pub fn decode_auth_tag(&self) -> Result<[u8; TAG_LEN], StructuralError> {
        let bytes = BASE64
            .decode(&self.auth_tag)
            .map_err(|_| StructuralError::InvalidEncoding("authTag".into()))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| StructuralError::InvalidAuthTagLength(bytes.len()))
    }

    pub fn decode_nonce(&self) -> Result<Vec<u8>, StructuralError> {
        let bytes = BASE64
            .decode(&self.nonce)
            .map_err(|_| StructuralError::InvalidEncoding("nonce".into()))?;
        if bytes.len() < NONCE_MIN_LEN || bytes.len() > NONCE_MAX_LEN {
            return Err(StructuralError::InvalidNonceLength(bytes.len()));
        }
        Ok(bytes)
    }

    /// SHA-256 of the decoded nonce, lowercase hex. This is the only form of
    /// the nonce the relay ever persists.
    pub fn nonce_hash(&self) -> Result<String, StructuralError> {
        let raw = self.decode_nonce()?;
        Ok(hex::encode(Sha256::digest(&raw)))
    }

    /// Validate an already-typed envelope against the same contracts
    /// [`validate_structure`] enforces on raw JSON.
    pub fn validate(&self) -> Result<(), StructuralError> {
        validate_session_id(&self.session_id)?;
        if self.sender.is_empty() {
            return Err(StructuralError::InvalidType("sender".into()));
        }
        if self.receiver.is_empty() {
            return Err(StructuralError::InvalidType("receiver".into()));
        }
        if self.seq == 0 {
            return Err(StructuralError::InvalidType("seq".into()));
        }
        self.decode_ciphertext()?;
        self.decode_iv()?;
        self.decode_auth_tag()?;
        self.decode_nonce()?;
        validate_meta(self.envelope_type, self.meta.as_ref())
    }
}

/// Structural validation of a raw JSON envelope.
///
/// Checks run field-by-field: presence, JSON type, encoding, then length. On
/// success the typed [`Envelope`] is returned. A `FILE_CHUNK` whose
/// `chunkIndex` is not below `totalChunks` passes structurally (the file
/// pipeline rejects it at reassembly) but is logged.
pub fn validate_structure(value: &Value) -> Result<Envelope, StructuralError> {
    let object = value
        .as_object()
        .ok_or_else(|| StructuralError::InvalidType("envelope".into()))?;

    for field in [
        "type",
        "sessionId",
        "sender",
        "receiver",
        "ciphertext",
        "iv",
        "authTag",
        "timestamp",
        "seq",
        "nonce",
    ] {
        if !object.contains_key(field) {
            return Err(StructuralError::MissingField(field.into()));
        }
    }

    let envelope_type = match require_str(object, "type")? {
        "MSG" => EnvelopeType::Msg,
        "FILE_META" => EnvelopeType::FileMeta,
        "FILE_CHUNK" => EnvelopeType::FileChunk,
        _ => return Err(StructuralError::InvalidType("type".into())),
    };

    let session_id = require_str(object, "sessionId")?.to_string();
    validate_session_id(&session_id)?;

    let sender = require_nonempty_str(object, "sender")?.to_string();
    let receiver = require_nonempty_str(object, "receiver")?.to_string();

    let timestamp = object["timestamp"]
        .as_i64()
        .ok_or_else(|| StructuralError::InvalidType("timestamp".into()))?;

    let seq = object["seq"]
        .as_u64()
        .filter(|&s| s > 0)
        .ok_or_else(|| StructuralError::InvalidType("seq".into()))?;

    let meta = match object.get("meta") {
        Some(raw) if envelope_type != EnvelopeType::Msg => Some(parse_meta(envelope_type, raw)?),
        Some(_) | None if envelope_type == EnvelopeType::Msg => None,
        _ => return Err(StructuralError::MissingField("meta".into())),
    };

    let envelope = Envelope {
        envelope_type,
        session_id,
        sender,
        receiver,
        ciphertext: require_str(object, "ciphertext")?.to_string(),
        iv: require_str(object, "iv")?.to_string(),
        auth_tag: require_str(object, "authTag")?.to_string(),
        timestamp,
        seq,
        nonce: require_str(object, "nonce")?.to_string(),
        meta,
    };

    envelope.decode_ciphertext()?;
    envelope.decode_iv()?;
    envelope.decode_auth_tag()?;
    envelope.decode_nonce()?;

    Ok(envelope)
}

fn parse_meta(envelope_type: EnvelopeType, raw: &Value) -> Result<EnvelopeMeta, StructuralError> {
    match envelope_type {
        EnvelopeType::FileMeta => {
            let meta: FileMeta = serde_json::from_value(raw.clone())
                .map_err(|_| StructuralError::InvalidType("meta".into()))?;
            if meta.total_chunks == 0 {
                return Err(StructuralError::InvalidChunkIndex);
            }
            Ok(EnvelopeMeta::File(meta))
        }
        EnvelopeType::FileChunk => {
            let meta: ChunkMeta = serde_json::from_value(raw.clone())
                .map_err(|_| StructuralError::InvalidType("meta".into()))?;
            if meta.total_chunks == 0 {
                return Err(StructuralError::InvalidChunkIndex);
            }
            if meta.chunk_index >= meta.total_chunks {
                // Not a structural rejection; reassembly will refuse the set.
                warn!(
                    chunk_index = meta.chunk_index,
                    total_chunks = meta.total_chunks,
                    "chunk index out of declared range"
                );
            }
            Ok(EnvelopeMeta::Chunk(meta))
        }
        EnvelopeType::Msg => unreachable!("MSG envelopes carry no meta"),
    }
}

fn validate_meta(
    envelope_type: EnvelopeType,
    meta: Option<&EnvelopeMeta>,
) -> Result<(), StructuralError> {
    match (envelope_type, meta) {
        (EnvelopeType::Msg, _) => Ok(()),
        (EnvelopeType::FileMeta, Some(EnvelopeMeta::File(m))) if m.total_chunks > 0 => Ok(()),
        (EnvelopeType::FileChunk, Some(EnvelopeMeta::Chunk(m))) if m.total_chunks > 0 => Ok(()),
        (EnvelopeType::FileMeta, Some(EnvelopeMeta::File(_)))
        | (EnvelopeType::FileChunk, Some(EnvelopeMeta::Chunk(_))) => {
            Err(StructuralError::InvalidChunkIndex)
        }
        (_, Some(_)) => Err(StructuralError::InvalidType("meta".into())),
        (_, None) => Err(StructuralError::MissingField("meta".into())),
    }
}

fn validate_session_id(session_id: &str) -> Result<(), StructuralError> {
    let well_formed = session_id.len() == SESSION_ID_LEN
        && session_id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if well_formed {
        Ok(())
    } else {
        Err(StructuralError::InvalidEncoding("sessionId".into()))
    }
}

fn require_str<'a>(
    object: &'a serde_json::Map<String, Value>,
    field: &str,
) -> Result<&'a str, StructuralError> {
    object[field]
        .as_str()
        .ok_or_else(|| StructuralError::InvalidType(field.into()))
}

fn require_nonempty_str<'a>(
    object: &'a serde_json::Map<String, Value>,
    field: &str,
) -> Result<&'a str, StructuralError> {
    let value = require_str(object, field)?;
    if value.is_empty() {
        return Err(StructuralError::InvalidType(field.into()));
    }
    Ok(value)
}
