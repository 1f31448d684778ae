//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Session records and the session store.
//!
//! A session is the security association between one unordered pair of
//! users: directional AEAD keys, the local send counter, the highest
//! accepted peer sequence, and the set of used nonce hashes. Exactly one
//! session exists per pair (the store keeps a unique index on the sorted
//! pair); a re-handshake supersedes the previous session, and concurrent
//! handshakes converge by the loser adopting the winner.
//!
//! Key material lives in zeroizing wrappers, so deleting a session (or
//! dropping a superseded one) destroys its secrets.

use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::secret::{RecvKey, SecretBytes, SendKey};

/// Derive the deterministic session id for a user pair: lowercase hex of the
/// first 16 bytes of `SHA-256("<uidA>:<uidB>:session")` with the ids in
/// lexicographic order.
pub fn session_id_for(uid_a: &str, uid_b: &str) -> String {
    let (lo, hi) = if uid_a <= uid_b {
        (uid_a, uid_b)
    } else {
        (uid_b, uid_a)
    };
    let digest = Sha256::digest(format!("{lo}:{hi}:session").as_bytes());
    hex::encode(&digest[..16])
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("user {user} is not a participant of session {session_id}")]
    NotParticipant { session_id: String, user: String },

    #[error("a session already exists for this pair: {existing}")]
    SingletonViolation { existing: String },
}

/// One side's view of an established session.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub local_user: String,
    pub peer_user: String,
    root_key: SecretBytes,
    send_key: SendKey,
    recv_key: RecvKey,
    /// Next sequence number to allocate locally. Starts at 1.
    pub send_seq: u64,
    /// Highest sequence accepted from the peer. Starts at 0.
    pub peer_last_seq: u64,
    /// SHA-256 hex of nonces accepted from the peer, with acceptance time
    /// for pruning.
    used_nonces: HashMap<String, i64>,
    pub last_activity: i64,
}

impl Session {
    pub fn new(
        local_user: impl Into<String>,
        peer_user: impl Into<String>,
        root_key: SecretBytes,
        send_key: SendKey,
        recv_key: RecvKey,
        now_ms: i64,
    ) -> Self {
        let local_user = local_user.into();
        let peer_user = peer_user.into();
        Self {
            session_id: session_id_for(&local_user, &peer_user),
            local_user,
            peer_user,
            root_key,
            send_key,
            recv_key,
            send_seq: 1,
            peer_last_seq: 0,
            used_nonces: HashMap::new(),
            last_activity: now_ms,
        }
    }

    pub fn send_key(&self) -> &SendKey {
        &self.send_key
    }

    pub fn recv_key(&self) -> &RecvKey {
        &self.recv_key
    }

    pub(crate) fn root_key(&self) -> &SecretBytes {
        &self.root_key
    }

    /// The sorted participant pair, the store's uniqueness key.
    pub fn pair_key(&self) -> (String, String) {
        pair_key(&self.local_user, &self.peer_user)
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.local_user == user_id || self.peer_user == user_id
    }

    pub fn is_nonce_used(&self, nonce_hash: &str) -> bool {
        self.used_nonces.contains_key(nonce_hash)
    }

    /// Commit an accepted inbound envelope: record the nonce hash, advance
    /// the peer watermark, touch activity.
    pub fn commit_receive(&mut self, seq: u64, nonce_hash: &str, now_ms: i64) {
        self.used_nonces.insert(nonce_hash.to_string(), now_ms);
        if seq > self.peer_last_seq {
            self.peer_last_seq = seq;
        }
        self.last_activity = now_ms;
    }

    /// Shrink the used-nonce set once it grows past `max_size`, dropping the
    /// oldest entries first. Entries accepted within the last
    /// `2 * window_ms` are never pruned, whatever the size, so reordering
    /// inside the freshness window stays detectable.
    pub fn prune_nonces(&mut self, max_size: usize, window_ms: i64, now_ms: i64) {
        if self.used_nonces.len() <= max_size {
            return;
        }

        let cutoff = now_ms - 2 * window_ms;
        let mut entries: Vec<(String, i64)> = self
            .used_nonces
            .iter()
            .map(|(hash, &at)| (hash.clone(), at))
            .collect();
        // Oldest first; only the overflow beyond max_size is eligible.
        entries.sort_by_key(|(_, at)| *at);

        let excess = self.used_nonces.len() - max_size;
        for (hash, accepted_at) in entries.into_iter().take(excess) {
            if accepted_at >= cutoff {
                break;
            }
            self.used_nonces.remove(&hash);
        }
    }

    #[cfg(test)]
    pub(crate) fn nonce_set_len(&self) -> usize {
        self.used_nonces.len()
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Storage for one principal's sessions.
///
/// Implementations must make each operation atomic with respect to the
/// others; the message engine adds per-session send/receive locks on top for
/// multi-step pipelines.
pub trait SessionStore: Send + Sync {
    /// Insert a new session. Fails with [`SessionError::SingletonViolation`]
    /// when the pair already has one.
    fn create(&self, session: Session) -> Result<(), SessionError>;

    /// Insert or replace the pair's session. The superseded record is
    /// dropped (and its keys zeroized). Used by re-handshakes.
    fn install(&self, session: Session) -> Result<(), SessionError>;

    fn load(&self, session_id: &str, owner_id: &str) -> Result<Session, SessionError>;

    fn update_send_seq(&self, session_id: &str, seq: u64) -> Result<(), SessionError>;

    fn is_nonce_used(&self, session_id: &str, nonce_hash: &str) -> Result<bool, SessionError>;

    fn store_used_nonce(
        &self,
        session_id: &str,
        nonce_hash: &str,
        now_ms: i64,
    ) -> Result<(), SessionError>;

    /// Atomic accept: nonce hash + peer watermark + activity in one step.
    fn commit_receive(
        &self,
        session_id: &str,
        seq: u64,
        nonce_hash: &str,
        now_ms: i64,
    ) -> Result<(), SessionError>;

    fn delete(&self, session_id: &str) -> Result<(), SessionError>;

    fn find_by_pair(&self, uid_a: &str, uid_b: &str) -> Option<Session>;

    /// Remove every session the user participates in, purging nonce sets
    /// with them. Returns the number of sessions removed.
    fn purge_user(&self, user_id: &str) -> usize;

    /// Convergence helper for racing handshakes: try to create; when the
    /// pair index already holds a session, adopt it instead.
    fn create_or_adopt(&self, session: Session) -> Result<Session, SessionError> {
        let session_id = session.session_id.clone();
        let owner = session.local_user.clone();
        match self.create(session) {
            Ok(()) => self.load(&session_id, &owner),
            Err(SessionError::SingletonViolation { existing }) => self.load(&existing, &owner),
            Err(other) => Err(other),
        }
    }
}

/// In-process session store backed by a single mutex, which makes each trait
/// operation atomic.
pub struct InMemorySessionStore {
    max_nonce_set_size: usize,
    freshness_window_ms: i64,
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<String, Session>,
    /// Unique index on the sorted pair.
    pair_index: HashMap<(String, String), String>,
}

impl InMemorySessionStore {
    pub fn new(max_nonce_set_size: usize, freshness_window_ms: i64) -> Self {
        Self {
            max_nonce_set_size,
            freshness_window_ms,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, SessionError> {
        let mut inner = self.inner.lock().expect("session store poisoned");
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(f(session))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        let config = crate::config::CoreConfig::default();
        Self::new(config.max_nonce_set_size, config.freshness_window_ms)
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, session: Session) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().expect("session store poisoned");
        let pair = session.pair_key();
        if let Some(existing) = inner.pair_index.get(&pair) {
            return Err(SessionError::SingletonViolation {
                existing: existing.clone(),
            });
        }
        inner.pair_index.insert(pair, session.session_id.clone());
        inner.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    fn install(&self, session: Session) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().expect("session store poisoned");
        let pair = session.pair_key();
        if let Some(previous_id) = inner.pair_index.insert(pair, session.session_id.clone()) {
            // Superseded session drops here; its keys zeroize with it.
            inner.sessions.remove(&previous_id);
        }
        inner.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    fn load(&self, session_id: &str, owner_id: &str) -> Result<Session, SessionError> {
        let inner = self.inner.lock().expect("session store poisoned");
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        if !session.involves(owner_id) {
            return Err(SessionError::NotParticipant {
                session_id: session_id.to_string(),
                user: owner_id.to_string(),
            });
        }
        Ok(session.clone())
    }

    fn update_send_seq(&self, session_id: &str, seq: u64) -> Result<(), SessionError> {
        self.with_session(session_id, |session| {
            session.send_seq = seq;
        })
    }

    fn is_nonce_used(&self, session_id: &str, nonce_hash: &str) -> Result<bool, SessionError> {
        self.with_session(session_id, |session| session.is_nonce_used(nonce_hash))
    }

    fn store_used_nonce(
        &self,
        session_id: &str,
        nonce_hash: &str,
        now_ms: i64,
    ) -> Result<(), SessionError> {
        let (max, window) = (self.max_nonce_set_size, self.freshness_window_ms);
        self.with_session(session_id, |session| {
            session.used_nonces.insert(nonce_hash.to_string(), now_ms);
            session.prune_nonces(max, window, now_ms);
        })
    }

    fn commit_receive(
        &self,
        session_id: &str,
        seq: u64,
        nonce_hash: &str,
        now_ms: i64,
    ) -> Result<(), SessionError> {
        let (max, window) = (self.max_nonce_set_size, self.freshness_window_ms);
        self.with_session(session_id, |session| {
            session.commit_receive(seq, nonce_hash, now_ms);
            session.prune_nonces(max, window, now_ms);
        })
    }

    fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().expect("session store poisoned");
        let session = inner
            .sessions
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        inner.pair_index.remove(&session.pair_key());
        // `session` drops here; key material zeroizes.
        Ok(())
    }

    fn find_by_pair(&self, uid_a: &str, uid_b: &str) -> Option<Session> {
        let inner = self.inner.lock().expect("session store poisoned");
        let session_id = inner.pair_index.get(&pair_key(uid_a, uid_b))?;
        inner.sessions.get(session_id).cloned()
    }

    fn purge_user(&self, user_id: &str) -> usize {
        let mut inner = self.inner.lock().expect("session store poisoned");
        let doomed: Vec<String> = inner
            .sessions
            .values()
            .filter(|session| session.involves(user_id))
            .map(|session| session.session_id.clone())
            .collect();
        for session_id in &doomed {
            if let Some(session) = inner.sessions.remove(session_id) {
                inner.pair_index.remove(&session.pair_key());
            }
        }
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(local: &str, peer: &str) -> Session {
        let material = SecretBytes::random();
        Session::new(
            local,
            peer,
            SecretBytes::random(),
            SendKey::from_secret(material.clone()),
            RecvKey::from_secret(material),
            1_700_000_000_000,
        )
    }

    #[test]
    fn test_session_id_is_order_independent() {
        assert_eq!(session_id_for("alice", "bob"), session_id_for("bob", "alice"));
        let id = session_id_for("alice", "bob");
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn test_singleton_per_pair() {
        let store = InMemorySessionStore::default();
        store.create(test_session("alice", "bob")).unwrap();

        // Same pair from the other side collides on the pair index.
        let result = store.create(test_session("bob", "alice"));
        assert!(matches!(
            result,
            Err(SessionError::SingletonViolation { .. })
        ));

        // Different pair is fine.
        store.create(test_session("alice", "carol")).unwrap();
    }

    #[test]
    fn test_create_or_adopt_converges() {
        let store = InMemorySessionStore::default();
        let winner = test_session("alice", "bob");
        let winner_id = winner.session_id.clone();
        store.create(winner).unwrap();

        let adopted = store.create_or_adopt(test_session("bob", "alice")).unwrap();
        assert_eq!(adopted.session_id, winner_id);
    }

    #[test]
    fn test_install_supersedes() {
        let store = InMemorySessionStore::default();
        store.create(test_session("alice", "bob")).unwrap();
        let first = store.find_by_pair("alice", "bob").unwrap();

        let mut replacement = test_session("alice", "bob");
        replacement.send_seq = 99;
        store.install(replacement).unwrap();

        let current = store.find_by_pair("bob", "alice").unwrap();
        assert_eq!(current.session_id, first.session_id);
        assert_eq!(current.send_seq, 99);
    }

    #[test]
    fn test_load_enforces_participation() {
        let store = InMemorySessionStore::default();
        let session = test_session("alice", "bob");
        let session_id = session.session_id.clone();
        store.create(session).unwrap();

        assert!(store.load(&session_id, "alice").is_ok());
        assert!(store.load(&session_id, "bob").is_ok());
        assert!(matches!(
            store.load(&session_id, "mallory"),
            Err(SessionError::NotParticipant { .. })
        ));
    }

    #[test]
    fn test_commit_receive_updates_state() {
        let store = InMemorySessionStore::default();
        let session = test_session("alice", "bob");
        let session_id = session.session_id.clone();
        store.create(session).unwrap();

        store
            .commit_receive(&session_id, 7, "abc123", 1_700_000_001_000)
            .unwrap();

        let session = store.load(&session_id, "alice").unwrap();
        assert_eq!(session.peer_last_seq, 7);
        assert!(session.is_nonce_used("abc123"));
        assert_eq!(session.last_activity, 1_700_000_001_000);
        assert!(store.is_nonce_used(&session_id, "abc123").unwrap());
    }

    #[test]
    fn test_nonce_pruning_keeps_floor_and_recent() {
        let mut session = test_session("alice", "bob");
        let window = 120_000;
        let now = 10_000_000;

        // 40 old entries, well past 2*window.
        for i in 0..40 {
            session.commit_receive(i + 1, &format!("old-{i}"), now - 3 * window - i as i64);
        }
        // 5 recent entries inside the protected horizon.
        for i in 0..5 {
            session.commit_receive(100 + i, &format!("new-{i}"), now - 1_000);
        }

        session.prune_nonces(16, window, now);
        // Floor respected: at most shrunk to max_size, recent all kept.
        assert_eq!(session.nonce_set_len(), 16);
        for i in 0..5 {
            assert!(session.is_nonce_used(&format!("new-{i}")));
        }

        // A set below the cap is never pruned.
        session.prune_nonces(1024, window, now);
        assert_eq!(session.nonce_set_len(), 16);
    }

    #[test]
    fn test_purge_user_cascades() {
        let store = InMemorySessionStore::default();
        store.create(test_session("alice", "bob")).unwrap();
        store.create(test_session("alice", "carol")).unwrap();
        store.create(test_session("dave", "erin")).unwrap();

        assert_eq!(store.purge_user("alice"), 2);
        assert!(store.find_by_pair("alice", "bob").is_none());
        assert!(store.find_by_pair("alice", "carol").is_none());
        assert!(store.find_by_pair("dave", "erin").is_some());
    }

    #[test]
    fn test_delete_removes_pair_index() {
        let store = InMemorySessionStore::default();
        let session = test_session("alice", "bob");
        let session_id = session.session_id.clone();
        store.create(session).unwrap();

        store.delete(&session_id).unwrap();
        assert!(store.find_by_pair("alice", "bob").is_none());
        // Pair slot is free again.
        store.create(test_session("alice", "bob")).unwrap();
    }
}
