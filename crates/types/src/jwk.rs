//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! P-256 public keys as JWKs.
//!
//! Identity and ephemeral public keys travel as JWKs with `kty=EC`,
//! `crv=P-256` and base64url (unpadded) affine coordinates. Public keys are
//! content-addressed: `key_hash` is the SHA-256 of the canonical JSON form,
//! which the relay stores alongside uploaded keys for tamper detection.
//! Private scalars never appear in this type.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, FieldBytes, PublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::canonical::{canonical_json_bytes, CanonicalError};

/// P-256 affine coordinate length in bytes.
const COORDINATE_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum JwkError {
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("unsupported curve: {0}")]
    UnsupportedCurve(String),

    #[error("coordinate {0} is not valid base64url")]
    InvalidCoordinateEncoding(&'static str),

    #[error("coordinate {coordinate} must decode to {expected} bytes, got {got}")]
    InvalidCoordinateLength {
        coordinate: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("coordinates do not describe a point on P-256")]
    InvalidPoint,

    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

/// A P-256 public key in JWK form (no private component).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcPublicJwk {
    pub kty: String,
    pub crv: String,
    /// Affine x coordinate, base64url without padding.
    pub x: String,
    /// Affine y coordinate, base64url without padding.
    pub y: String,
}

impl EcPublicJwk {
    /// Export a `p256::PublicKey` as a JWK.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let point = key.to_encoded_point(false);
        // Uncompressed SEC1 points always carry both coordinates.
        let x = point.x().expect("uncompressed point has x");
        let y = point.y().expect("uncompressed point has y");

        Self {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: URL_SAFE_NO_PAD.encode(x),
            y: URL_SAFE_NO_PAD.encode(y),
        }
    }

    /// Reconstruct the `p256::PublicKey`, rejecting malformed coordinates and
    /// points not on the curve.
    pub fn to_public_key(&self) -> Result<PublicKey, JwkError> {
        if self.kty != "EC" {
            return Err(JwkError::UnsupportedKeyType(self.kty.clone()));
        }
        if self.crv != "P-256" {
            return Err(JwkError::UnsupportedCurve(self.crv.clone()));
        }

        let x = decode_coordinate("x", &self.x)?;
        let y = decode_coordinate("y", &self.y)?;

        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&x),
            FieldBytes::from_slice(&y),
            false,
        );

        Option::<PublicKey>::from(PublicKey::from_encoded_point(&point))
            .ok_or(JwkError::InvalidPoint)
    }

    /// Content address: SHA-256 of the canonical JSON form, lowercase hex.
    pub fn key_hash(&self) -> Result<String, JwkError> {
        let canonical = canonical_json_bytes(self)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}

fn decode_coordinate(name: &'static str, encoded: &str) -> Result<[u8; COORDINATE_LEN], JwkError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| JwkError::InvalidCoordinateEncoding(name))?;

    bytes
        .as_slice()
        .try_into()
        .map_err(|_| JwkError::InvalidCoordinateLength {
            coordinate: name,
            expected: COORDINATE_LEN,
            got: bytes.len(),
        })
}
