//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Chunked file encryption and ordered reassembly.
//!
//! A file becomes one `FILE_META` envelope (its descriptor, encrypted)
//! followed by `ceil(len / 262144)` `FILE_CHUNK` envelopes, each sealed
//! independently with a fresh IV and a fresh anti-replay nonce, all sharing
//! the session and a run of consecutive sequence numbers. Chunks may arrive
//! in any order; reassembly requires exactly the declared set of chunk
//! indices and aborts without surfacing partial plaintext if any chunk fails
//! authentication.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::{random_bytes, AeadSealed, CryptoError};
use crate::secret::{RecvKey, SendKey};
use quietwire_types::canonical::canonical_json_bytes;
use quietwire_types::envelope::{
    ChunkMeta, Envelope, EnvelopeMeta, EnvelopeType, FileMeta, StructuralError, CHUNK_SIZE,
};

#[derive(Error, Debug)]
pub enum FileError {
    #[error("file of {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("chunk set incomplete: expected {expected}, got {got}")]
    MissingChunks { expected: u32, got: u32 },

    #[error("chunk index {index} inconsistent with declared total {total}")]
    ChunkIndexMismatch { index: u32, total: u32 },

    /// Some chunk failed AEAD verification. No detail, no partial output.
    #[error("file decryption failed")]
    Decryption,

    #[error("file metadata blob is malformed")]
    InvalidMetadata,

    #[error("envelope type does not belong to a file transfer")]
    UnexpectedEnvelopeType,

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Addressing shared by every envelope of one transfer.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeRoute<'a> {
    pub session_id: &'a str,
    pub sender: &'a str,
    pub receiver: &'a str,
}

/// A plaintext file queued for sending.
#[derive(Debug, Clone, Copy)]
pub struct FileSource<'a> {
    pub filename: &'a str,
    pub mimetype: &'a str,
    pub data: &'a [u8],
}

/// A fully reassembled inbound file.
pub struct DecryptedFile {
    pub filename: String,
    pub mimetype: String,
    pub size: u64,
    pub total_chunks: u32,
    /// Plaintext, zeroized when dropped.
    pub data: Zeroizing<Vec<u8>>,
}

/// Seal AEAD output into an envelope with a fresh anti-replay nonce.
///
/// The nonce here is independent of the AEAD IV inside `sealed`; the two are
/// distinct protocol objects.
pub(crate) fn seal_into_envelope(
    envelope_type: EnvelopeType,
    route: EnvelopeRoute<'_>,
    sealed: AeadSealed,
    seq: u64,
    now_ms: i64,
    meta: Option<EnvelopeMeta>,
) -> Envelope {
    Envelope {
        envelope_type,
        session_id: route.session_id.to_string(),
        sender: route.sender.to_string(),
        receiver: route.receiver.to_string(),
        ciphertext: BASE64.encode(&sealed.ciphertext),
        iv: BASE64.encode(sealed.iv),
        auth_tag: BASE64.encode(sealed.tag),
        timestamp: now_ms,
        seq,
        nonce: BASE64.encode(random_bytes(16)),
        meta,
    }
}

/// Encrypt a file into its envelope run: `FILE_META` at `first_seq`, then
/// one `FILE_CHUNK` per 256 KiB slice at the following sequence numbers.
pub fn encrypt_file(
    send_key: &SendKey,
    route: EnvelopeRoute<'_>,
    file: FileSource<'_>,
    first_seq: u64,
    now_ms: i64,
    max_file_size: u64,
) -> Result<Vec<Envelope>, FileError> {
    let size = file.data.len() as u64;
    if size > max_file_size {
        return Err(FileError::FileTooLarge {
            size,
            limit: max_file_size,
        });
    }

    // An empty file still ships one (empty) chunk so the transfer has a
    // well-formed chunk set.
    let total_chunks = file.data.len().div_ceil(CHUNK_SIZE).max(1) as u32;

    let descriptor = FileMeta {
        filename: file.filename.to_string(),
        size,
        total_chunks,
        mimetype: file.mimetype.to_string(),
    };

    let mut envelopes = Vec::with_capacity(total_chunks as usize + 1);

    // The descriptor travels encrypted; the cleartext copy on the envelope
    // is what the relay may account against.
    let descriptor_blob = Zeroizing::new(canonical_json_bytes(&descriptor).map_err(|_| {
        FileError::InvalidMetadata
    })?);
    let sealed = send_key.seal(&descriptor_blob)?;
    envelopes.push(seal_into_envelope(
        EnvelopeType::FileMeta,
        route,
        sealed,
        first_seq,
        now_ms,
        Some(EnvelopeMeta::File(descriptor.clone())),
    ));

    let mut chunks = file.data.chunks(CHUNK_SIZE);
    for index in 0..total_chunks {
        // `chunks` yields nothing for an empty file; substitute the single
        // empty slice.
        let chunk_data = chunks.next().unwrap_or(&[]);
        let sealed = send_key.seal(chunk_data)?;
        envelopes.push(seal_into_envelope(
            EnvelopeType::FileChunk,
            route,
            sealed,
            first_seq + 1 + index as u64,
            now_ms,
            Some(EnvelopeMeta::Chunk(ChunkMeta {
                chunk_index: index,
                total_chunks,
            })),
        ));
    }

    Ok(envelopes)
}

/// Decrypt and reassemble a file from its `FILE_META` envelope and chunk
/// set, presented in any order.
pub fn decrypt_file(
    recv_key: &RecvKey,
    meta_envelope: &Envelope,
    chunks: &[Envelope],
) -> Result<DecryptedFile, FileError> {
    if meta_envelope.envelope_type != EnvelopeType::FileMeta {
        return Err(FileError::UnexpectedEnvelopeType);
    }

    let descriptor_blob = Zeroizing::new(open_envelope(recv_key, meta_envelope)?);
    let descriptor: FileMeta =
        serde_json::from_slice(&descriptor_blob).map_err(|_| FileError::InvalidMetadata)?;
    let total = descriptor.total_chunks;
    if total == 0 {
        return Err(FileError::InvalidMetadata);
    }

    // Index the chunk set; duplicates are tolerated only when byte-identical.
    let mut by_index: BTreeMap<u32, &Envelope> = BTreeMap::new();
    for chunk in chunks {
        if chunk.envelope_type != EnvelopeType::FileChunk {
            return Err(FileError::UnexpectedEnvelopeType);
        }
        let index = match &chunk.meta {
            Some(EnvelopeMeta::Chunk(meta)) => meta.chunk_index,
            _ => return Err(FileError::InvalidMetadata),
        };
        if index >= total {
            return Err(FileError::ChunkIndexMismatch { index, total });
        }
        if let Some(existing) = by_index.get(&index) {
            if existing.ciphertext != chunk.ciphertext {
                return Err(FileError::ChunkIndexMismatch { index, total });
            }
            continue;
        }
        by_index.insert(index, chunk);
    }

    if by_index.len() as u32 != total {
        return Err(FileError::MissingChunks {
            expected: total,
            got: by_index.len() as u32,
        });
    }

    // Capacity bounded by the chunk set, not the declared size alone.
    let capacity = (descriptor.size as usize).min((total as usize).saturating_mul(CHUNK_SIZE));
    let mut data = Zeroizing::new(Vec::with_capacity(capacity));
    for (_, chunk) in by_index {
        let plaintext = Zeroizing::new(
            recv_key
                .open(
                    &chunk.decode_iv()?,
                    &chunk.decode_ciphertext()?,
                    &chunk.decode_auth_tag()?,
                )
                .map_err(|_| FileError::Decryption)?,
        );
        data.extend_from_slice(&plaintext);
    }

    Ok(DecryptedFile {
        filename: descriptor.filename,
        mimetype: descriptor.mimetype,
        size: descriptor.size,
        total_chunks: total,
        data,
    })
}

fn open_envelope(recv_key: &RecvKey, envelope: &Envelope) -> Result<Vec<u8>, FileError> {
    recv_key
        .open(
            &envelope.decode_iv()?,
            &envelope.decode_ciphertext()?,
            &envelope.decode_auth_tag()?,
        )
        .map_err(|_| FileError::Decryption)
}
