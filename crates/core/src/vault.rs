//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! At-rest encryption of session key material.
//!
//! Session keys may be persisted only under a user-scoped vault key derived
//! with PBKDF2-HMAC-SHA-256 from a passphrase the user holds. The vault
//! never stores or logs the derived key; records carry the salt so the key
//! can be re-derived at import time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::{decrypt_aead, derive_user_key, encrypt_aead, random_bytes, CryptoError};
use crate::secret::{RecvKey, SecretBytes, SendKey};
use crate::session::Session;

const VAULT_SALT_LEN: usize = 16;

/// An encrypted 32-byte secret, safe to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultRecord {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

/// A user-scoped sealing key derived from a passphrase.
pub struct KeyVault {
    key: SecretBytes,
    salt: Vec<u8>,
}

impl KeyVault {
    /// Derive the vault key from a passphrase and an existing salt.
    pub fn derive(passphrase: &str, salt: &[u8], iterations: u32) -> Self {
        Self {
            key: derive_user_key(passphrase.as_bytes(), salt, iterations),
            salt: salt.to_vec(),
        }
    }

    /// Derive with a fresh random salt (first-time setup).
    pub fn with_random_salt(passphrase: &str, iterations: u32) -> Self {
        let salt = random_bytes(VAULT_SALT_LEN);
        Self::derive(passphrase, &salt, iterations)
    }

    /// The salt to persist next to the records.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn seal(&self, secret: &SecretBytes) -> Result<VaultRecord, CryptoError> {
        let sealed = encrypt_aead(self.key.expose(), secret.expose())?;
        Ok(VaultRecord {
            ciphertext: BASE64.encode(&sealed.ciphertext),
            iv: BASE64.encode(sealed.iv),
            tag: BASE64.encode(sealed.tag),
        })
    }

    pub fn open(&self, record: &VaultRecord) -> Result<SecretBytes, CryptoError> {
        let ciphertext = BASE64
            .decode(&record.ciphertext)
            .map_err(|_| CryptoError::AuthFailure)?;
        let iv: [u8; 12] = BASE64
            .decode(&record.iv)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(CryptoError::AuthFailure)?;
        let tag: [u8; 16] = BASE64
            .decode(&record.tag)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(CryptoError::AuthFailure)?;

        let plaintext = decrypt_aead(self.key.expose(), &iv, &ciphertext, &tag)?;
        let bytes: [u8; 32] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::AuthFailure)?;
        Ok(SecretBytes::new(bytes))
    }
}

/// A session's key material at rest. Counters and nonce state are not part
/// of the backup; only secrets need sealing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionKeyBackup {
    pub session_id: String,
    pub root: VaultRecord,
    pub send: VaultRecord,
    pub recv: VaultRecord,
}

pub fn seal_session_keys(
    vault: &KeyVault,
    session: &Session,
) -> Result<SessionKeyBackup, CryptoError> {
    Ok(SessionKeyBackup {
        session_id: session.session_id.clone(),
        root: vault.seal(session.root_key())?,
        send: vault.seal(session.send_key().secret())?,
        recv: vault.seal(session.recv_key().secret())?,
    })
}

pub fn open_session_keys(
    vault: &KeyVault,
    backup: &SessionKeyBackup,
) -> Result<(SecretBytes, SendKey, RecvKey), CryptoError> {
    let root = vault.open(&backup.root)?;
    let send = SendKey::from_secret(vault.open(&backup.send)?);
    let recv = RecvKey::from_secret(vault.open(&backup.recv)?);
    Ok((root, send, recv))
}
