//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Cryptographic primitives for the quietwire protocol.
//!
//! Everything here is P-256 / SHA-256 era NIST crypto by protocol contract:
//! AES-256-GCM for payloads, ECDH P-256 for key agreement, ECDSA P-256 for
//! identity signatures, HKDF for the key schedule, HMAC for key
//! confirmation, PBKDF2 for user-derived vault keys. Authentication failures
//! are a single kind — nothing in the error reveals which byte diverged.

use aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::signature::{RandomizedSigner, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::PublicKey;
use pbkdf2::pbkdf2_hmac;
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::secret::SecretBytes;
use quietwire_types::canonical::{canonical_json_bytes, CanonicalError};
use quietwire_types::envelope::{IV_LEN, TAG_LEN};
use quietwire_types::jwk::{EcPublicJwk, JwkError};

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// AEAD verification failed. Deliberately carries no detail.
    #[error("authentication failed")]
    AuthFailure,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid signature encoding: {0}")]
    InvalidSignatureFormat(String),

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error(transparent)]
    Jwk(#[from] JwkError),

    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

/// Output of one AEAD seal: ciphertext with the 16-byte tag split off and
/// the fresh 12-byte IV used for this call only.
pub struct AeadSealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
}

/// AES-256-GCM encryption with a fresh random IV per call.
pub fn encrypt_aead(key: &[u8; 32], plaintext: &[u8]) -> Result<AeadSealed, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut combined = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed("AES-256-GCM seal".to_string()))?;

    // The aead crate appends the tag; the wire format carries it separately.
    let tag_bytes = combined.split_off(combined.len() - TAG_LEN);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&tag_bytes);

    Ok(AeadSealed {
        ciphertext: combined,
        iv,
        tag,
    })
}

/// AES-256-GCM decryption. Every verification failure collapses into
/// [`CryptoError::AuthFailure`].
pub fn decrypt_aead(
    key: &[u8; 32],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(Nonce::from_slice(iv), combined.as_slice())
        .map_err(|_| CryptoError::AuthFailure)
}

/// HKDF-SHA-256 (RFC 5869), extract-then-expand.
pub fn hkdf(ikm: &[u8], salt: &[u8], info: &[u8], length: usize) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed("HKDF output length".to_string()))?;
    Ok(okm)
}

/// HKDF convenience for the 32-byte keys the protocol derives everywhere.
pub fn hkdf32(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<SecretBytes, CryptoError> {
    let okm = hkdf(ikm, salt, info, 32)?;
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&okm);
    Ok(SecretBytes::new(bytes))
}

/// HMAC-SHA-256.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey("HMAC key".to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time HMAC comparison. Use this, never `==`, for confirmation
/// values received from a peer.
pub fn hmac_verify(key: &[u8], data: &[u8], expected: &[u8]) -> Result<bool, CryptoError> {
    let computed = hmac_sha256(key, data)?;
    Ok(computed[..].ct_eq(expected).into())
}

/// PBKDF2-HMAC-SHA-256 for user-derived key material (at-rest vault keys).
pub fn derive_user_key(passphrase: &[u8], salt: &[u8], iterations: u32) -> SecretBytes {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase, salt, iterations, &mut out);
    SecretBytes::new(out)
}

/// `n` bytes from the OS CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

pub fn b64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn b64_decode(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidSignatureFormat(format!("invalid base64: {e}")))
}

/// Long-lived ECDSA P-256 identity keypair.
///
/// The private half is generated on, and never leaves, its owner's device.
/// The public half travels as a JWK (`quietwire_types::jwk::EcPublicJwk`)
/// and is content-addressed by the hash of its canonical JSON.
pub struct IdentityKeypair {
    signing: SigningKey,
}

impl IdentityKeypair {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::random(&mut OsRng),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key().clone()
    }

    /// Export the public half as a JWK (no `d` component exists on this type).
    pub fn public_jwk(&self) -> EcPublicJwk {
        EcPublicJwk::from_public_key(&PublicKey::from(&self.verifying_key()))
    }

    /// Sign the canonical JSON of `value` with the identity key. ECDSA
    /// signatures are randomized; two signatures over the same bytes differ.
    pub fn sign_canonical<T: Serialize>(&self, value: &T) -> Result<String, CryptoError> {
        let canonical = canonical_json_bytes(value)?;
        let signature: Signature = self.signing.sign_with_rng(&mut OsRng, &canonical);
        Ok(BASE64.encode(signature.to_bytes()))
    }
}

/// Verify a base64 ECDSA signature over the canonical JSON of `value`.
///
/// Malformed encodings are errors; a well-formed signature that does not
/// verify yields `Ok(false)` — a single failure kind with no detail.
pub fn verify_canonical_signature<T: Serialize>(
    signer: &EcPublicJwk,
    signature_b64: &str,
    value: &T,
) -> Result<bool, CryptoError> {
    let verifying_key = VerifyingKey::from(&signer.to_public_key()?);

    let signature_bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| CryptoError::InvalidSignatureFormat(format!("invalid base64: {e}")))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|_| CryptoError::InvalidSignatureFormat("not a P-256 signature".to_string()))?;

    let canonical = canonical_json_bytes(value)?;
    Ok(verifying_key.verify(&canonical, &signature).is_ok())
}

/// Per-handshake ECDH P-256 keypair.
///
/// [`EphemeralKeypair::derive`] consumes the keypair, so the private scalar
/// is destroyed (zeroized by `EphemeralSecret`'s drop) immediately after the
/// one derivation it exists for.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Export the public half as a JWK without `d`.
    pub fn public_jwk(&self) -> EcPublicJwk {
        EcPublicJwk::from_public_key(&self.public)
    }

    /// Run ECDH against the peer's ephemeral public key, yielding the
    /// 32-byte shared secret. Consumes `self`.
    pub fn derive(self, peer_public: &PublicKey) -> Result<SecretBytes, CryptoError> {
        let shared = self.secret.diffie_hellman(peer_public);

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(shared.raw_secret_bytes());

        // Contributory-behavior check, mirroring the all-zero guard used for
        // the identity point.
        if bytes.iter().all(|&b| b == 0) {
            return Err(CryptoError::KeyDerivationFailed(
                "ECDH produced zero shared secret".to_string(),
            ));
        }

        Ok(SecretBytes::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aead_round_trip() {
        let key = SecretBytes::random();
        let plaintext = b"hello, sealed world";

        let sealed = encrypt_aead(key.expose(), plaintext).unwrap();
        assert_ne!(sealed.ciphertext, plaintext);

        let opened = decrypt_aead(key.expose(), &sealed.iv, &sealed.ciphertext, &sealed.tag)
            .unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_aead_fresh_iv_per_call() {
        let key = SecretBytes::random();
        let a = encrypt_aead(key.expose(), b"same input").unwrap();
        let b = encrypt_aead(key.expose(), b"same input").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_aead_tampering_is_single_failure_kind() {
        let key = SecretBytes::random();
        let sealed = encrypt_aead(key.expose(), b"integrity matters").unwrap();

        // Flip one byte of each component in turn; all collapse to AuthFailure.
        let mut ct = sealed.ciphertext.clone();
        ct[0] ^= 0x01;
        assert!(matches!(
            decrypt_aead(key.expose(), &sealed.iv, &ct, &sealed.tag),
            Err(CryptoError::AuthFailure)
        ));

        let mut iv = sealed.iv;
        iv[3] ^= 0x01;
        assert!(matches!(
            decrypt_aead(key.expose(), &iv, &sealed.ciphertext, &sealed.tag),
            Err(CryptoError::AuthFailure)
        ));

        let mut tag = sealed.tag;
        tag[15] ^= 0x01;
        assert!(matches!(
            decrypt_aead(key.expose(), &sealed.iv, &sealed.ciphertext, &tag),
            Err(CryptoError::AuthFailure)
        ));
    }

    #[test]
    fn test_hkdf_rfc5869_case_1() {
        let ikm = [0x0b; 22];
        let salt: Vec<u8> = (0x00u8..=0x0c).collect();
        let info: Vec<u8> = (0xf0u8..=0xf9).collect();

        let okm = hkdf(&ikm, &salt, &info, 42).unwrap();
        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn test_hmac_rfc4231_case_1() {
        let key = [0x0b; 20];
        let mac = hmac_sha256(&key, b"Hi There").unwrap();
        assert_eq!(
            hex::encode(mac),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
    }

    #[test]
    fn test_hmac_verify_constant_time_interface() {
        let key = b"confirmation key";
        let mac = hmac_sha256(key, b"CONFIRM:alice").unwrap();
        assert!(hmac_verify(key, b"CONFIRM:alice", &mac).unwrap());
        assert!(!hmac_verify(key, b"CONFIRM:mallory", &mac).unwrap());
    }

    #[test]
    fn test_ecdh_both_sides_agree() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();

        let alice_pub = *alice.public_key();
        let bob_pub = *bob.public_key();

        let shared_a = alice.derive(&bob_pub).unwrap();
        let shared_b = bob.derive(&alice_pub).unwrap();
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn test_ecdsa_sign_verify_canonical() {
        let identity = IdentityKeypair::generate();
        let jwk = identity.public_jwk();

        let payload = serde_json::json!({"b": 2, "a": 1});
        let signature = identity.sign_canonical(&payload).unwrap();

        assert!(verify_canonical_signature(&jwk, &signature, &payload).unwrap());

        // Same content, different field order: canonicalization makes it verify.
        let reordered = serde_json::json!({"a": 1, "b": 2});
        assert!(verify_canonical_signature(&jwk, &signature, &reordered).unwrap());

        // Different content fails as a single kind.
        let tampered = serde_json::json!({"a": 1, "b": 3});
        assert!(!verify_canonical_signature(&jwk, &signature, &tampered).unwrap());
    }

    #[test]
    fn test_ecdsa_signatures_randomized() {
        let identity = IdentityKeypair::generate();
        let payload = serde_json::json!({"msg": "same"});
        let first = identity.sign_canonical(&payload).unwrap();
        let second = identity.sign_canonical(&payload).unwrap();
        // sign_with_rng draws fresh randomness per call, so identical input
        // never yields identical signatures.
        assert_ne!(first, second);
        let jwk = identity.public_jwk();
        assert!(verify_canonical_signature(&jwk, &first, &payload).unwrap());
        assert!(verify_canonical_signature(&jwk, &second, &payload).unwrap());
    }

    #[test]
    fn test_wrong_identity_rejects_signature() {
        let signer = IdentityKeypair::generate();
        let other = IdentityKeypair::generate();

        let payload = serde_json::json!({"claim": "it was me"});
        let signature = signer.sign_canonical(&payload).unwrap();
        assert!(!verify_canonical_signature(&other.public_jwk(), &signature, &payload).unwrap());
    }

    #[test]
    fn test_pbkdf2_deterministic_per_iteration_count() {
        // Test-tier iteration count; production default is configured higher.
        let a = derive_user_key(b"correct horse", b"salt", 5_000);
        let b = derive_user_key(b"correct horse", b"salt", 5_000);
        let c = derive_user_key(b"correct horse", b"salt", 5_001);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_random_bytes_length_and_variation() {
        let a = random_bytes(16);
        let b = random_bytes(16);
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
