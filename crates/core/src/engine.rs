//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! The message engine: the two externally visible operations of a client.
//!
//! `send` turns plaintext into envelopes, `receive` turns envelopes back
//! into plaintext. Per session, a send-lock serializes sequence allocation
//! (held only long enough to sample the counter — encryption happens outside
//! it) and a receive-lock makes the guard's check-and-commit atomic.
//! Distinct sessions progress independently.
//!
//! A failed decryption commits nothing: the nonce hash stays unknown and the
//! peer watermark does not move, so the legitimate copy of the envelope can
//! still be accepted later.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::CoreConfig;
use crate::error::ProtocolError;
use crate::filepipe::{
    decrypt_file, encrypt_file, seal_into_envelope, DecryptedFile, EnvelopeRoute, FileError,
    FileSource,
};
use crate::guard::{unix_millis, FreshnessConfig, ReplayGuard};
use crate::session::SessionStore;
use quietwire_types::envelope::{Envelope, EnvelopeMeta, EnvelopeType, CHUNK_SIZE};

/// One decrypted inbound envelope.
pub struct DecryptedEnvelope {
    pub envelope_type: EnvelopeType,
    pub seq: u64,
    pub meta: Option<EnvelopeMeta>,
    /// Plaintext, zeroized on drop.
    pub plaintext: Zeroizing<Vec<u8>>,
}

#[derive(Default)]
struct SessionLocks {
    send: Mutex<()>,
    recv: Mutex<()>,
}

/// Send/receive pipelines for one principal over a session store.
pub struct MessageEngine<S: SessionStore> {
    user_id: String,
    store: Arc<S>,
    config: CoreConfig,
    guard: ReplayGuard,
    locks: StdMutex<HashMap<String, Arc<SessionLocks>>>,
}

impl<S: SessionStore> MessageEngine<S> {
    pub fn new(user_id: impl Into<String>, store: Arc<S>, config: CoreConfig) -> Self {
        let guard = ReplayGuard::new(FreshnessConfig::from_core(&config));
        Self {
            user_id: user_id.into(),
            store,
            config,
            guard,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn locks_for(&self, session_id: &str) -> Arc<SessionLocks> {
        let mut registry = self.locks.lock().expect("lock registry poisoned");
        registry
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Encrypt a text message into a single `MSG` envelope.
    pub async fn send_text(
        &self,
        session_id: &str,
        plaintext: &[u8],
    ) -> Result<Envelope, ProtocolError> {
        let locks = self.locks_for(session_id);

        // Sample the sequence under the send-lock, then release before the
        // (synchronous but non-trivial) AEAD work.
        let (session, seq) = {
            let _send = locks.send.lock().await;
            let session = self.store.load(session_id, &self.user_id)?;
            let seq = session.send_seq;
            self.store.update_send_seq(session_id, seq + 1)?;
            (session, seq)
        };

        let sealed = session.send_key().seal(plaintext)?;
        let envelope = seal_into_envelope(
            EnvelopeType::Msg,
            EnvelopeRoute {
                session_id,
                sender: &self.user_id,
                receiver: &session.peer_user,
            },
            sealed,
            seq,
            unix_millis(),
            None,
        );

        debug!(
            event = "message_sent",
            session_id,
            seq,
            "MSG envelope produced"
        );
        Ok(envelope)
    }

    /// Encrypt a file into its `FILE_META` + `FILE_CHUNK` envelope run with
    /// consecutive sequence numbers.
    pub async fn send_file(
        &self,
        session_id: &str,
        filename: &str,
        mimetype: &str,
        data: &[u8],
    ) -> Result<Vec<Envelope>, ProtocolError> {
        // Size gate before any sequence numbers are burned.
        if data.len() as u64 > self.config.max_file_size {
            return Err(FileError::FileTooLarge {
                size: data.len() as u64,
                limit: self.config.max_file_size,
            }
            .into());
        }

        let envelope_count = data.len().div_ceil(CHUNK_SIZE).max(1) as u64 + 1;
        let locks = self.locks_for(session_id);

        let (session, first_seq) = {
            let _send = locks.send.lock().await;
            let session = self.store.load(session_id, &self.user_id)?;
            let first_seq = session.send_seq;
            self.store
                .update_send_seq(session_id, first_seq + envelope_count)?;
            (session, first_seq)
        };

        let envelopes = encrypt_file(
            session.send_key(),
            EnvelopeRoute {
                session_id,
                sender: &self.user_id,
                receiver: &session.peer_user,
            },
            FileSource {
                filename,
                mimetype,
                data,
            },
            first_seq,
            unix_millis(),
            self.config.max_file_size,
        )?;

        debug!(
            event = "file_sent",
            session_id,
            first_seq,
            envelopes = envelopes.len(),
            "file envelope run produced"
        );
        Ok(envelopes)
    }

    /// Validate, guard, and decrypt one inbound envelope.
    ///
    /// The replay commit (nonce hash + peer watermark) happens only after
    /// the AEAD opens; a forged envelope cannot poison the nonce set.
    pub async fn receive(&self, envelope: &Envelope) -> Result<DecryptedEnvelope, ProtocolError> {
        envelope.validate()?;

        let locks = self.locks_for(&envelope.session_id);
        let _recv = locks.recv.lock().await;

        let session = self.store.load(&envelope.session_id, &self.user_id)?;
        if envelope.sender != session.peer_user || envelope.receiver != session.local_user {
            return Err(ProtocolError::RouteMismatch);
        }

        let now_ms = unix_millis();
        let nonce_hash = self.guard.precheck(
            &envelope.session_id,
            &envelope.nonce,
            envelope.timestamp,
            envelope.seq,
            session.peer_last_seq,
            |hash| session.is_nonce_used(hash),
            now_ms,
        )?;

        let plaintext = session
            .recv_key()
            .open(
                &envelope.decode_iv()?,
                &envelope.decode_ciphertext()?,
                &envelope.decode_auth_tag()?,
            )
            .map_err(|error| {
                warn!(
                    event = "decryption_failed",
                    session_id = %envelope.session_id,
                    seq = envelope.seq,
                    "inbound envelope failed authentication"
                );
                error
            })?;

        self.store
            .commit_receive(&envelope.session_id, envelope.seq, &nonce_hash, now_ms)?;

        Ok(DecryptedEnvelope {
            envelope_type: envelope.envelope_type,
            seq: envelope.seq,
            meta: envelope.meta.clone(),
            plaintext: Zeroizing::new(plaintext),
        })
    }

    /// Receive a complete file transfer: guard every envelope, reassemble,
    /// and commit the whole run only once every chunk has authenticated.
    pub async fn receive_file(
        &self,
        meta_envelope: &Envelope,
        chunks: &[Envelope],
    ) -> Result<DecryptedFile, ProtocolError> {
        meta_envelope.validate()?;
        for chunk in chunks {
            chunk.validate()?;
        }

        let locks = self.locks_for(&meta_envelope.session_id);
        let _recv = locks.recv.lock().await;

        let session = self
            .store
            .load(&meta_envelope.session_id, &self.user_id)?;

        let now_ms = unix_millis();
        let mut watermark = session.peer_last_seq;
        let mut batch_hashes: Vec<(u64, String)> = Vec::with_capacity(chunks.len() + 1);

        for envelope in std::iter::once(meta_envelope).chain(chunks.iter()) {
            if envelope.sender != session.peer_user || envelope.receiver != session.local_user {
                return Err(ProtocolError::RouteMismatch);
            }
            let nonce_hash = self.guard.precheck(
                &envelope.session_id,
                &envelope.nonce,
                envelope.timestamp,
                envelope.seq,
                watermark,
                |hash| {
                    session.is_nonce_used(hash) || batch_hashes.iter().any(|(_, h)| h == hash)
                },
                now_ms,
            )?;
            watermark = watermark.max(envelope.seq);
            batch_hashes.push((envelope.seq, nonce_hash));
        }

        let file = decrypt_file(session.recv_key(), meta_envelope, chunks)?;

        for (seq, nonce_hash) in batch_hashes {
            self.store
                .commit_receive(&meta_envelope.session_id, seq, &nonce_hash, now_ms)?;
        }

        Ok(file)
    }
}
