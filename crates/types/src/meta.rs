//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! The metadata-only record the relay persists per envelope.
//!
//! A `MessageMeta` row deliberately has no fields for ciphertext, IV, auth
//! tag, raw nonce, or plaintext — the type system is the persistence
//! contract. The nonce survives only as its SHA-256, and `metadata_hash`
//! covers the canonical subset of routing fields so tampering with stored
//! rows is detectable on read.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::canonical::{canonical_json_bytes, CanonicalError};
use crate::envelope::{Envelope, EnvelopeMeta, EnvelopeType, StructuralError};
use crate::kep::{KepInit, KepResponse};

/// Everything the relay persists a row for: data envelopes and the two
/// handshake messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "MSG")]
    Msg,
    #[serde(rename = "FILE_META")]
    FileMeta,
    #[serde(rename = "FILE_CHUNK")]
    FileChunk,
    #[serde(rename = "KEP_INIT")]
    KepInit,
    #[serde(rename = "KEP_RESPONSE")]
    KepResponse,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Msg => "MSG",
            MessageKind::FileMeta => "FILE_META",
            MessageKind::FileChunk => "FILE_CHUNK",
            MessageKind::KepInit => "KEP_INIT",
            MessageKind::KepResponse => "KEP_RESPONSE",
        }
    }

    /// True for the two handshake kinds.
    pub fn is_kep(&self) -> bool {
        matches!(self, MessageKind::KepInit | MessageKind::KepResponse)
    }
}

impl From<EnvelopeType> for MessageKind {
    fn from(value: EnvelopeType) -> Self {
        match value {
            EnvelopeType::Msg => MessageKind::Msg,
            EnvelopeType::FileMeta => MessageKind::FileMeta,
            EnvelopeType::FileChunk => MessageKind::FileChunk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    /// `<sessionId>:<seq>:<timestamp>`.
    pub message_id: String,
    pub session_id: String,
    pub sender: String,
    pub receiver: String,
    #[serde(rename = "type")]
    pub envelope_type: MessageKind,
    pub timestamp: i64,
    pub seq: u64,
    /// SHA-256 of the envelope nonce, lowercase hex. Never the nonce itself.
    pub nonce_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EnvelopeMeta>,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<i64>,
    /// SHA-256 over the canonical routing subset, lowercase hex.
    pub metadata_hash: String,
}

impl MessageMeta {
    /// Build the persistable record from a validated envelope. Secret-bearing
    /// fields are dropped here and cannot be recovered from the row.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, MetaError> {
        let nonce_hash = envelope.nonce_hash()?;
        Self::build(
            envelope.session_id.clone(),
            envelope.sender.clone(),
            envelope.receiver.clone(),
            envelope.envelope_type.into(),
            envelope.timestamp,
            envelope.seq,
            envelope.meta.clone(),
            nonce_hash,
        )
    }

    /// Persistable row for a relayed `KEP_INIT`. The ephemeral key and its
    /// signature are forwarded, never stored.
    pub fn from_kep_init(init: &KepInit) -> Result<Self, MetaError> {
        Self::build(
            init.session_id.clone(),
            init.from.clone(),
            init.to.clone(),
            MessageKind::KepInit,
            init.timestamp,
            init.seq,
            None,
            hash_b64_nonce(&init.nonce)?,
        )
    }

    /// Persistable row for a relayed `KEP_RESPONSE`.
    pub fn from_kep_response(response: &KepResponse) -> Result<Self, MetaError> {
        Self::build(
            response.session_id.clone(),
            response.from.clone(),
            response.to.clone(),
            MessageKind::KepResponse,
            response.timestamp,
            response.seq,
            None,
            hash_b64_nonce(&response.nonce)?,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        session_id: String,
        sender: String,
        receiver: String,
        kind: MessageKind,
        timestamp: i64,
        seq: u64,
        meta: Option<EnvelopeMeta>,
        nonce_hash: String,
    ) -> Result<Self, MetaError> {
        let metadata_hash = compute_metadata_hash(
            &session_id,
            &sender,
            &receiver,
            kind,
            timestamp,
            seq,
            meta.as_ref(),
        )?;

        Ok(Self {
            message_id: format!("{session_id}:{seq}:{timestamp}"),
            session_id,
            sender,
            receiver,
            envelope_type: kind,
            timestamp,
            seq,
            nonce_hash,
            meta,
            delivered: false,
            delivered_at: None,
            metadata_hash,
        })
    }

    /// Recompute the integrity hash from the row's own fields.
    pub fn expected_metadata_hash(&self) -> Result<String, MetaError> {
        compute_metadata_hash(
            &self.session_id,
            &self.sender,
            &self.receiver,
            self.envelope_type,
            self.timestamp,
            self.seq,
            self.meta.as_ref(),
        )
    }

    /// True when the stored hash matches the recomputed one. Rows failing
    /// this check must be excluded from reads.
    pub fn verify_integrity(&self) -> bool {
        self.expected_metadata_hash()
            .map(|expected| expected == self.metadata_hash)
            .unwrap_or(false)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

fn hash_b64_nonce(nonce_b64: &str) -> Result<String, MetaError> {
    let raw = BASE64
        .decode(nonce_b64)
        .map_err(|_| StructuralError::InvalidEncoding("nonce".into()))?;
    Ok(hex::encode(Sha256::digest(&raw)))
}

fn compute_metadata_hash(
    session_id: &str,
    sender: &str,
    receiver: &str,
    envelope_type: MessageKind,
    timestamp: i64,
    seq: u64,
    meta: Option<&EnvelopeMeta>,
) -> Result<String, MetaError> {
    let mut subset = json!({
        "sessionId": session_id,
        "sender": sender,
        "receiver": receiver,
        "type": envelope_type.as_str(),
        "timestamp": timestamp,
        "seq": seq,
    });
    if let Some(meta) = meta {
        subset["meta"] = serde_json::to_value(meta).map_err(CanonicalError::from)?;
    }

    let canonical = canonical_json_bytes(&subset)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{validate_structure, IV_LEN, TAG_LEN};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    fn sample_envelope() -> Envelope {
        validate_structure(&json!({
            "type": "FILE_CHUNK",
            "sessionId": "0123456789abcdef0123456789abcdef",
            "sender": "alice",
            "receiver": "bob",
            "ciphertext": BASE64.encode(b"sealed"),
            "iv": BASE64.encode([3u8; IV_LEN]),
            "authTag": BASE64.encode([4u8; TAG_LEN]),
            "timestamp": 1_700_000_000_000i64,
            "seq": 12,
            "nonce": BASE64.encode([9u8; 16]),
            "meta": {"chunkIndex": 1, "totalChunks": 2},
        }))
        .unwrap()
    }

    #[test]
    fn test_row_never_contains_secret_fields() {
        let row = MessageMeta::from_envelope(&sample_envelope()).unwrap();
        let serialized = serde_json::to_value(&row).unwrap();
        let object = serialized.as_object().unwrap();

        for forbidden in ["ciphertext", "iv", "authTag", "nonce", "plaintext"] {
            assert!(
                !object.contains_key(forbidden),
                "persisted row must not contain {forbidden}"
            );
        }
        assert!(object.contains_key("nonceHash"));
        assert!(object.contains_key("metadataHash"));
    }

    #[test]
    fn test_integrity_round_trip() {
        let row = MessageMeta::from_envelope(&sample_envelope()).unwrap();
        assert!(row.verify_integrity());
    }

    #[test]
    fn test_tampered_row_detected() {
        let mut row = MessageMeta::from_envelope(&sample_envelope()).unwrap();
        row.receiver = "mallory".to_string();
        assert!(!row.verify_integrity());

        let mut row = MessageMeta::from_envelope(&sample_envelope()).unwrap();
        row.seq += 1;
        assert!(!row.verify_integrity());
    }

    #[test]
    fn test_delivery_fields_outside_hash() {
        // Delivery state changes after persistence and must not break the hash.
        let mut row = MessageMeta::from_envelope(&sample_envelope()).unwrap();
        row.delivered = true;
        row.delivered_at = Some(1_700_000_099_000);
        assert!(row.verify_integrity());
    }

    #[test]
    fn test_message_id_matches_envelope() {
        let envelope = sample_envelope();
        let row = MessageMeta::from_envelope(&envelope).unwrap();
        assert_eq!(row.message_id, envelope.message_id());
    }

    #[test]
    fn test_kep_row_persists_no_key_material() {
        use crate::jwk::EcPublicJwk;
        use crate::kep::{KepInit, KepMessageType};
        use p256::SecretKey;
        use rand_core::OsRng;

        let secret = SecretKey::random(&mut OsRng);
        let init = KepInit {
            msg_type: KepMessageType::Init,
            from: "alice".to_string(),
            to: "bob".to_string(),
            session_id: "0123456789abcdef0123456789abcdef".to_string(),
            eph_pub: EcPublicJwk::from_public_key(&secret.public_key()),
            signature: BASE64.encode([1u8; 64]),
            timestamp: 1_700_000_000_000,
            seq: 1,
            nonce: BASE64.encode([8u8; 16]),
        };

        let row = MessageMeta::from_kep_init(&init).unwrap();
        assert_eq!(row.envelope_type, MessageKind::KepInit);
        assert!(row.verify_integrity());

        let serialized = serde_json::to_string(&row).unwrap();
        assert!(!serialized.contains(&init.eph_pub.x));
        assert!(!serialized.contains(&init.signature));
        assert!(!serialized.contains(&init.nonce));
    }
}
