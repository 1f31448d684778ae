//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Key Exchange Protocol wire messages.
//!
//! `KEP_INIT` and `KEP_RESPONSE` carry a signed ephemeral P-256 public key
//! between the two peers of a handshake. The signature covers the canonical
//! JSON of the ephemeral JWK; `KEP_RESPONSE` additionally carries the
//! responder's key confirmation HMAC. The cryptographic checks live in
//! `quietwire-core`; this module is shape only.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::envelope::{StructuralError, NONCE_MAX_LEN, NONCE_MIN_LEN, SESSION_ID_LEN};
use crate::jwk::EcPublicJwk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KepMessageType {
    #[serde(rename = "KEP_INIT")]
    Init,
    #[serde(rename = "KEP_RESPONSE")]
    Response,
}

/// Handshake opener, signed by the initiator's identity key. Always `seq=1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KepInit {
    #[serde(rename = "type")]
    pub msg_type: KepMessageType,
    pub from: String,
    pub to: String,
    pub session_id: String,
    /// Ephemeral ECDH public key, JWK without `d`.
    pub eph_pub: EcPublicJwk,
    /// Base64 ECDSA P-256 signature over `canonical_json(eph_pub)`.
    pub signature: String,
    pub timestamp: i64,
    pub seq: u64,
    /// Base64 of 16 random bytes; replay token, hashed server-side.
    pub nonce: String,
}

/// Handshake reply, signed by the responder's identity key. Always `seq=2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KepResponse {
    #[serde(rename = "type")]
    pub msg_type: KepMessageType,
    pub from: String,
    pub to: String,
    pub session_id: String,
    pub eph_pub: EcPublicJwk,
    pub signature: String,
    /// Base64 of `HMAC-SHA256(rootKey, "CONFIRM:" || initiatorUserId)`.
    pub key_confirmation: String,
    pub timestamp: i64,
    pub seq: u64,
    pub nonce: String,
}

impl KepInit {
    pub fn validate(&self) -> Result<(), StructuralError> {
        if self.msg_type != KepMessageType::Init {
            return Err(StructuralError::InvalidType("type".into()));
        }
        validate_common(
            &self.from,
            &self.to,
            &self.session_id,
            &self.signature,
            self.seq,
            &self.nonce,
        )
    }
}

impl KepResponse {
    pub fn validate(&self) -> Result<(), StructuralError> {
        if self.msg_type != KepMessageType::Response {
            return Err(StructuralError::InvalidType("type".into()));
        }
        validate_common(
            &self.from,
            &self.to,
            &self.session_id,
            &self.signature,
            self.seq,
            &self.nonce,
        )?;
        if BASE64.decode(&self.key_confirmation).is_err() {
            return Err(StructuralError::InvalidEncoding("keyConfirmation".into()));
        }
        Ok(())
    }
}

fn validate_common(
    from: &str,
    to: &str,
    session_id: &str,
    signature: &str,
    seq: u64,
    nonce: &str,
) -> Result<(), StructuralError> {
    if from.is_empty() {
        return Err(StructuralError::InvalidType("from".into()));
    }
    if to.is_empty() {
        return Err(StructuralError::InvalidType("to".into()));
    }
    let session_ok = session_id.len() == SESSION_ID_LEN
        && session_id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !session_ok {
        return Err(StructuralError::InvalidEncoding("sessionId".into()));
    }
    if seq == 0 {
        return Err(StructuralError::InvalidType("seq".into()));
    }
    if BASE64.decode(signature).is_err() {
        return Err(StructuralError::InvalidEncoding("signature".into()));
    }
    let nonce_len = BASE64
        .decode(nonce)
        .map_err(|_| StructuralError::InvalidEncoding("nonce".into()))?
        .len();
    if !(NONCE_MIN_LEN..=NONCE_MAX_LEN).contains(&nonce_len) {
        return Err(StructuralError::InvalidNonceLength(nonce_len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::SecretKey;
    use rand_core::OsRng;

    fn sample_init() -> KepInit {
        let secret = SecretKey::random(&mut OsRng);
        KepInit {
            msg_type: KepMessageType::Init,
            from: "alice".to_string(),
            to: "bob".to_string(),
            session_id: "0123456789abcdef0123456789abcdef".to_string(),
            eph_pub: EcPublicJwk::from_public_key(&secret.public_key()),
            signature: BASE64.encode([0u8; 64]),
            timestamp: 1_700_000_000_000,
            seq: 1,
            nonce: BASE64.encode([5u8; 16]),
        }
    }

    #[test]
    fn test_wire_shape() {
        let init = sample_init();
        let value = serde_json::to_value(&init).unwrap();
        assert_eq!(value["type"], "KEP_INIT");
        assert_eq!(value["ephPub"]["kty"], "EC");
        assert_eq!(value["sessionId"], init.session_id);
        assert!(value.get("ephPub").unwrap().get("d").is_none());

        let parsed: KepInit = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, init);
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert!(sample_init().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_session_id() {
        let mut init = sample_init();
        init.session_id = "short".to_string();
        assert_eq!(
            init.validate(),
            Err(StructuralError::InvalidEncoding("sessionId".into()))
        );
    }

    #[test]
    fn test_validate_rejects_short_nonce() {
        let mut init = sample_init();
        init.nonce = BASE64.encode([1u8; 8]);
        assert_eq!(init.validate(), Err(StructuralError::InvalidNonceLength(8)));
    }

    #[test]
    fn test_response_requires_decodable_confirmation() {
        let init = sample_init();
        let mut response = KepResponse {
            msg_type: KepMessageType::Response,
            from: init.to.clone(),
            to: init.from.clone(),
            session_id: init.session_id.clone(),
            eph_pub: init.eph_pub.clone(),
            signature: init.signature.clone(),
            key_confirmation: BASE64.encode([2u8; 32]),
            timestamp: init.timestamp,
            seq: 2,
            nonce: init.nonce.clone(),
        };
        assert!(response.validate().is_ok());

        response.key_confirmation = "***".to_string();
        assert_eq!(
            response.validate(),
            Err(StructuralError::InvalidEncoding("keyConfirmation".into()))
        );
    }
}
