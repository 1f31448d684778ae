//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Relay-side registry of session pairs.
//!
//! The relay never holds session keys; it only knows which unordered user
//! pair owns which session id. The sorted pair is the unique key: racing
//! creations converge silently, the loser adopting the winner's record
//! (never a user-visible error).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use quietwire_core::session::session_id_for;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    /// Sorted participant pair.
    pub participants: [String; 2],
    pub created_at: i64,
}

#[derive(Default)]
pub struct PairRegistry {
    inner: RwLock<HashMap<(String, String), SessionRecord>>,
}

impl PairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the singleton session record for a pair, creating it on first
    /// use. Idempotent by construction.
    pub async fn ensure(&self, user_a: &str, user_b: &str, now_ms: i64) -> SessionRecord {
        let key = sorted_pair(user_a, user_b);
        let mut inner = self.inner.write().await;
        inner
            .entry(key.clone())
            .or_insert_with(|| SessionRecord {
                session_id: session_id_for(user_a, user_b),
                participants: [key.0.clone(), key.1.clone()],
                created_at: now_ms,
            })
            .clone()
    }

    pub async fn lookup(&self, session_id: &str) -> Option<SessionRecord> {
        let inner = self.inner.read().await;
        inner
            .values()
            .find(|record| record.session_id == session_id)
            .cloned()
    }

    /// Deactivation cascade: remove every pair involving the user in one
    /// write-lock scope. Returns the removed session ids so the caller can
    /// purge dependent state.
    pub async fn purge_user(&self, user_id: &str) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let doomed: Vec<(String, String)> = inner
            .keys()
            .filter(|(a, b)| a == user_id || b == user_id)
            .cloned()
            .collect();
        doomed
            .into_iter()
            .filter_map(|key| inner.remove(&key))
            .map(|record| record.session_id)
            .collect()
    }
}

fn sorted_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_is_idempotent_and_order_independent() {
        let registry = PairRegistry::new();
        let first = registry.ensure("alice", "bob", 1).await;
        let second = registry.ensure("bob", "alice", 2).await;

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.participants, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_purge_user_removes_all_pairs() {
        let registry = PairRegistry::new();
        registry.ensure("alice", "bob", 1).await;
        registry.ensure("alice", "carol", 1).await;
        registry.ensure("dave", "erin", 1).await;

        let removed = registry.purge_user("alice").await;
        assert_eq!(removed.len(), 2);
        assert!(registry.lookup(&session_id_for("dave", "erin")).await.is_some());
        assert!(registry.lookup(&session_id_for("alice", "bob")).await.is_none());
    }
}
