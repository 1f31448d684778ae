//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! The metadata store contract and its in-process implementation.
//!
//! The durable backend (document store, SQL — a deployment concern) sits
//! behind [`MetaStore`]. Two unique indexes are part of the contract, not an
//! implementation nicety: `(sessionId, nonceHash)` and
//! `(sessionId, seq, timestamp)`. Concurrent inserts racing on either index
//! must surface as the typed [`StoreError`] variants so the enforcement
//! layer can answer with a replay rejection instead of a 500.
//!
//! Sequence watermarks are tracked per `(sessionId, sender)` and reset when
//! a handshake completes: a fresh session legitimately restarts its data
//! plane at `seq = 1`, while replays of pre-rotation traffic keep dying on
//! the persistent nonce index.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

use quietwire_types::meta::MessageMeta;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("nonce hash already recorded for session {session_id}")]
    DuplicateNonce { session_id: String },

    #[error("(seq, timestamp) already recorded for session {session_id}")]
    DuplicateSeqTimestamp { session_id: String },

    #[error("message not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Persist a metadata row. Unique-index violations return the typed
    /// duplicate errors.
    async fn insert(&self, row: MessageMeta) -> Result<(), StoreError>;

    /// Highest persisted data-plane sequence for `(session, sender)` in the
    /// current key epoch.
    async fn last_seq(&self, session_id: &str, sender: &str) -> u64;

    /// Whether a nonce hash was ever recorded for the session. Spans key
    /// epochs deliberately.
    async fn nonce_seen(&self, session_id: &str, nonce_hash: &str) -> bool;

    /// Start a new key epoch for the session: data-plane watermarks drop to
    /// zero. Called when a handshake completes.
    async fn reset_watermarks(&self, session_id: &str);

    async fn mark_delivered(&self, message_id: &str, at_ms: i64) -> Result<(), StoreError>;

    /// Undelivered rows addressed to `user_id`, integrity-verified. Rows
    /// failing verification are excluded and logged, never returned.
    async fn pending_for(&self, user_id: &str) -> Vec<MessageMeta>;
}

#[derive(Default)]
struct MetaInner {
    rows: HashMap<String, MessageMeta>,
    /// Unique index: (sessionId, nonceHash).
    nonce_index: HashSet<(String, String)>,
    /// Unique index: (sessionId, seq, timestamp).
    replay_index: HashSet<(String, u64, i64)>,
    /// Data-plane watermark per (sessionId, sender), reset on re-handshake.
    watermarks: HashMap<(String, String), u64>,
}

/// In-process [`MetaStore`] used by tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryMetaStore {
    inner: RwLock<MetaInner>,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored row in place, bypassing every invariant. Exists to
    /// exercise tamper detection; nothing in the relay calls this.
    pub async fn overwrite_row(&self, message_id: &str, row: MessageMeta) {
        let mut inner = self.inner.write().await;
        inner.rows.insert(message_id.to_string(), row);
    }

    pub async fn row(&self, message_id: &str) -> Option<MessageMeta> {
        self.inner.read().await.rows.get(message_id).cloned()
    }
}

#[async_trait]
impl MetaStore for InMemoryMetaStore {
    async fn insert(&self, row: MessageMeta) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        let nonce_key = (row.session_id.clone(), row.nonce_hash.clone());
        if inner.nonce_index.contains(&nonce_key) {
            return Err(StoreError::DuplicateNonce {
                session_id: row.session_id.clone(),
            });
        }

        let replay_key = (row.session_id.clone(), row.seq, row.timestamp);
        if inner.replay_index.contains(&replay_key) {
            return Err(StoreError::DuplicateSeqTimestamp {
                session_id: row.session_id.clone(),
            });
        }

        inner.nonce_index.insert(nonce_key);
        inner.replay_index.insert(replay_key);

        if !row.envelope_type.is_kep() {
            let watermark_key = (row.session_id.clone(), row.sender.clone());
            let watermark = inner.watermarks.entry(watermark_key).or_insert(0);
            *watermark = (*watermark).max(row.seq);
        }

        inner.rows.insert(row.message_id.clone(), row);
        Ok(())
    }

    async fn last_seq(&self, session_id: &str, sender: &str) -> u64 {
        let inner = self.inner.read().await;
        inner
            .watermarks
            .get(&(session_id.to_string(), sender.to_string()))
            .copied()
            .unwrap_or(0)
    }

    async fn nonce_seen(&self, session_id: &str, nonce_hash: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .nonce_index
            .contains(&(session_id.to_string(), nonce_hash.to_string()))
    }

    async fn reset_watermarks(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        inner
            .watermarks
            .retain(|(sid, _), _| sid.as_str() != session_id);
    }

    async fn mark_delivered(&self, message_id: &str, at_ms: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .rows
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound(message_id.to_string()))?;
        row.delivered = true;
        row.delivered_at = Some(at_ms);
        Ok(())
    }

    async fn pending_for(&self, user_id: &str) -> Vec<MessageMeta> {
        let inner = self.inner.read().await;
        let mut pending: Vec<MessageMeta> = inner
            .rows
            .values()
            .filter(|row| row.receiver == user_id && !row.delivered)
            .filter(|row| {
                let intact = row.verify_integrity();
                if !intact {
                    warn!(
                        event = "metadata_tamper_detected",
                        message_id = %row.message_id,
                        session_id = %row.session_id,
                        "stored row failed integrity verification; excluded"
                    );
                }
                intact
            })
            .cloned()
            .collect();
        pending.sort_by_key(|row| (row.timestamp, row.seq));
        pending
    }
}
