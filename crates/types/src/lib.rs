//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Shared wire types for the quietwire protocol.
//!
//! This crate defines the canonical data model exchanged between clients and
//! the relay: the authenticated message/file envelopes, the key-exchange
//! (KEP) handshake messages, identity keys as P-256 JWKs, and the
//! metadata-only `MessageMeta` record the relay persists. It also carries the
//! envelope codec — structural validation with typed errors — and the single
//! canonical-JSON function every hash and signature in the protocol is
//! computed over.
//!
//! Nothing in this crate touches key material; cryptographic operations live
//! in `quietwire-core`.

pub mod canonical;
pub mod envelope;
pub mod jwk;
pub mod kep;
pub mod meta;

pub use canonical::{canonical_json, canonical_json_bytes, CanonicalError};
pub use envelope::{
    validate_structure, ChunkMeta, Envelope, EnvelopeMeta, EnvelopeType, FileMeta,
    StructuralError, CHUNK_SIZE, DEFAULT_MAX_FILE_SIZE, IV_LEN, NONCE_MAX_LEN, NONCE_MIN_LEN,
    SESSION_ID_LEN, TAG_LEN,
};
pub use jwk::{EcPublicJwk, JwkError};
pub use kep::{KepInit, KepMessageType, KepResponse};
pub use meta::{MessageKind, MessageMeta};
