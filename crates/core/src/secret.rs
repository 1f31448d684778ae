//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Zeroizing wrappers for key material.
//!
//! [`SecretBytes`] holds 32 bytes of secret material: zeroized on drop,
//! redacted in `Debug`, compared in constant time, never serialized. The
//! directional handles [`SendKey`] and [`RecvKey`] are capability types — a
//! `SendKey` can only seal, a `RecvKey` can only open, and neither exposes
//! its raw bytes outside this crate.

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{decrypt_aead, encrypt_aead, AeadSealed, CryptoError};
use quietwire_types::envelope::{IV_LEN, TAG_LEN};

/// 32 bytes of secret key material.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes([u8; 32]);

impl SecretBytes {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Sample fresh material from the OS CSPRNG.
    pub fn random() -> Self {
        use rand_core::{OsRng, RngCore};
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Access the raw bytes. The caller must not copy them into
    /// non-zeroizing storage or logs.
    pub(crate) fn expose(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Clone for SecretBytes {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBytes([REDACTED])")
    }
}

impl PartialEq for SecretBytes {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for SecretBytes {}

/// Encrypt-only handle over a directional session key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendKey(SecretBytes);

impl SendKey {
    pub fn from_secret(secret: SecretBytes) -> Self {
        Self(secret)
    }

    /// AEAD-seal `plaintext` under this key with a fresh random IV.
    pub fn seal(&self, plaintext: &[u8]) -> Result<AeadSealed, CryptoError> {
        encrypt_aead(self.0.expose(), plaintext)
    }

    pub(crate) fn secret(&self) -> &SecretBytes {
        &self.0
    }
}

/// Decrypt-only handle over a directional session key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecvKey(SecretBytes);

impl RecvKey {
    pub fn from_secret(secret: SecretBytes) -> Self {
        Self(secret)
    }

    /// AEAD-open a sealed payload. Any mismatch — ciphertext, IV, or tag —
    /// surfaces as the single [`CryptoError::AuthFailure`] kind.
    pub fn open(
        &self,
        iv: &[u8; IV_LEN],
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<Vec<u8>, CryptoError> {
        decrypt_aead(self.0.expose(), iv, ciphertext, tag)
    }

    pub(crate) fn secret(&self) -> &SecretBytes {
        &self.0
    }
}
