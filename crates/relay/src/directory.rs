//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Identity key directory with tamper evidence.
//!
//! Users upload their public identity JWKs; the relay stores each with its
//! content address (`keyHash`, the SHA-256 of the canonical JWK JSON). Every
//! read recomputes the hash — a stored key that no longer matches is treated
//! as tampered and withheld rather than served.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::RelayError;
use quietwire_types::jwk::EcPublicJwk;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentityKey {
    pub user_id: String,
    pub public_identity_key_jwk: EcPublicJwk,
    pub key_hash: String,
    pub uploaded_at: i64,
}

#[derive(Default)]
pub struct KeyDirectory {
    inner: RwLock<HashMap<String, StoredIdentityKey>>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) a user's identity key; returns the content hash
    /// the client should pin.
    pub async fn upload(
        &self,
        user_id: &str,
        jwk: EcPublicJwk,
        now_ms: i64,
    ) -> Result<String, RelayError> {
        // Reject keys that do not describe a valid P-256 point outright.
        jwk.to_public_key()
            .map_err(|_| RelayError::Structural(
                quietwire_types::envelope::StructuralError::InvalidType(
                    "publicIdentityKeyJWK".into(),
                ),
            ))?;

        let key_hash = jwk
            .key_hash()
            .map_err(|_| RelayError::MetadataTamperDetected)?;

        let record = StoredIdentityKey {
            user_id: user_id.to_string(),
            public_identity_key_jwk: jwk,
            key_hash: key_hash.clone(),
            uploaded_at: now_ms,
        };

        self.inner
            .write()
            .await
            .insert(user_id.to_string(), record);
        Ok(key_hash)
    }

    /// Fetch a user's identity key, verifying the stored hash first.
    pub async fn fetch(&self, user_id: &str) -> Result<StoredIdentityKey, RelayError> {
        let record = {
            let inner = self.inner.read().await;
            inner
                .get(user_id)
                .cloned()
                .ok_or_else(|| RelayError::UnknownKey(user_id.to_string()))?
        };

        let recomputed = record
            .public_identity_key_jwk
            .key_hash()
            .map_err(|_| RelayError::MetadataTamperDetected)?;
        if recomputed != record.key_hash {
            warn!(
                event = "metadata_tamper_detected",
                user_id,
                "stored identity key failed hash verification"
            );
            return Err(RelayError::MetadataTamperDetected);
        }

        Ok(record)
    }

    /// Test and administrative support: mutate a stored record directly.
    pub async fn overwrite(&self, user_id: &str, record: StoredIdentityKey) {
        self.inner
            .write()
            .await
            .insert(user_id.to_string(), record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::SecretKey;
    use rand_core::OsRng;

    fn jwk() -> EcPublicJwk {
        EcPublicJwk::from_public_key(&SecretKey::random(&mut OsRng).public_key())
    }

    #[tokio::test]
    async fn test_upload_fetch_round_trip() {
        let directory = KeyDirectory::new();
        let key = jwk();
        let hash = directory.upload("alice", key.clone(), 1).await.unwrap();

        let fetched = directory.fetch("alice").await.unwrap();
        assert_eq!(fetched.public_identity_key_jwk, key);
        assert_eq!(fetched.key_hash, hash);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let directory = KeyDirectory::new();
        assert!(matches!(
            directory.fetch("nobody").await,
            Err(RelayError::UnknownKey(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_key_is_withheld() {
        let directory = KeyDirectory::new();
        directory.upload("alice", jwk(), 1).await.unwrap();

        // Swap the stored key without refreshing the hash.
        let mut record = directory.fetch("alice").await.unwrap();
        record.public_identity_key_jwk = jwk();
        directory.overwrite("alice", record).await;

        assert!(matches!(
            directory.fetch("alice").await,
            Err(RelayError::MetadataTamperDetected)
        ));
    }

    #[tokio::test]
    async fn test_reupload_rotates_hash() {
        let directory = KeyDirectory::new();
        let first = directory.upload("alice", jwk(), 1).await.unwrap();
        let second = directory.upload("alice", jwk(), 2).await.unwrap();
        assert_ne!(first, second);
        assert!(directory.fetch("alice").await.is_ok());
    }
}
