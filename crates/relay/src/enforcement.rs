//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! The relay enforcement pipeline.
//!
//! For every inbound envelope or KEP message: authenticate-by-header caller
//! must equal the claimed sender; structure is validated; the same
//! freshness/nonce/sequence policy the receiving client applies runs here
//! against persisted rows; a metadata-only row is stored (unique indexes
//! turning races into typed rejections); and the full message is forwarded
//! to every live transport of the receiver, marking delivery when at least
//! one accepts.
//!
//! A completed handshake (`KEP_RESPONSE` relayed) starts a new key epoch:
//! data-plane sequence watermarks reset, while nonce memory persists so
//! pre-rotation traffic can never be replayed into the new epoch.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::RelayError;
use crate::monitor::{AlertKind, SecurityMonitor};
use crate::rate_limit::RateLimits;
use crate::store::MetaStore;
use crate::transports::TransportRegistry;
use quietwire_core::guard::{unix_millis, FreshnessConfig, GuardError, ReplayGuard};
use quietwire_types::envelope::{validate_structure, Envelope, EnvelopeType, StructuralError};
use quietwire_types::kep::{KepInit, KepResponse};
use quietwire_types::meta::MessageMeta;

/// Delivery acknowledgment returned to the sender (`msg:sent`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayAck {
    pub message_id: String,
    pub session_id: String,
    pub delivered: bool,
}

pub struct RelayEngine<S: MetaStore> {
    store: Arc<S>,
    transports: Arc<TransportRegistry>,
    guard: ReplayGuard,
    monitor: Arc<SecurityMonitor>,
    limits: Arc<RateLimits>,
}

impl<S: MetaStore> RelayEngine<S> {
    pub fn new(
        store: Arc<S>,
        transports: Arc<TransportRegistry>,
        monitor: Arc<SecurityMonitor>,
        limits: Arc<RateLimits>,
        freshness: FreshnessConfig,
    ) -> Self {
        Self {
            store,
            transports,
            guard: ReplayGuard::new(freshness),
            monitor,
            limits,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn transports(&self) -> &Arc<TransportRegistry> {
        &self.transports
    }

    pub fn monitor(&self) -> &Arc<SecurityMonitor> {
        &self.monitor
    }

    /// Relay one data envelope (`MSG` / `FILE_META` / `FILE_CHUNK`).
    pub async fn relay_envelope(
        &self,
        caller: &str,
        origin: &str,
        raw: &Value,
    ) -> Result<RelayAck, RelayError> {
        self.limits.check_data(caller)?;

        let envelope = validate_structure(raw)?;
        if envelope.sender != caller {
            return Err(RelayError::SenderMismatch);
        }
        require_cipher_fields(&envelope)?;

        let now_ms = unix_millis();
        let last_seq = self.store.last_seq(&envelope.session_id, caller).await;
        let nonce_seen = self
            .store
            .nonce_seen(&envelope.session_id, &envelope.nonce_hash()?)
            .await;

        let guard_result = self.guard.precheck(
            &envelope.session_id,
            &envelope.nonce,
            envelope.timestamp,
            envelope.seq,
            last_seq,
            |_| nonce_seen,
            now_ms,
        );
        if let Err(error) = guard_result {
            self.monitor.record(AlertKind::ReplayAttempt, origin, now_ms);
            return Err(error.into());
        }

        let row = MessageMeta::from_envelope(&envelope)?;
        let message_id = row.message_id.clone();
        if let Err(error) = self.store.insert(row).await {
            // A racing duplicate lost to the unique index.
            self.monitor.record(AlertKind::ReplayAttempt, origin, now_ms);
            return Err(error.into());
        }

        let delivered = self.transports.deliver_to(&envelope.receiver, raw).await;
        if delivered {
            self.store.mark_delivered(&message_id, now_ms).await?;
        }

        debug!(
            event = "envelope_relayed",
            session_id = %envelope.session_id,
            seq = envelope.seq,
            delivered,
            "envelope accepted"
        );

        Ok(RelayAck {
            message_id,
            session_id: envelope.session_id,
            delivered,
        })
    }

    /// Relay a handshake message (`KEP_INIT` or `KEP_RESPONSE`).
    ///
    /// The relay cannot (and must not) verify handshake signatures — that is
    /// the peers' job. It enforces structure, freshness, nonce uniqueness,
    /// the fixed handshake sequence numbers, and the caller binding.
    pub async fn relay_kep(
        &self,
        caller: &str,
        origin: &str,
        raw: &Value,
    ) -> Result<RelayAck, RelayError> {
        self.limits.check_kep(caller)?;

        let (row, from, to, session_id, timestamp, completes_handshake) =
            match raw.get("type").and_then(Value::as_str) {
                Some("KEP_INIT") => {
                    let init: KepInit = serde_json::from_value(raw.clone())
                        .map_err(|_| StructuralError::InvalidType("KEP_INIT".into()))?;
                    init.validate()?;
                    if init.seq != 1 {
                        return Err(StructuralError::InvalidType("seq".into()).into());
                    }
                    let row = MessageMeta::from_kep_init(&init)?;
                    (row, init.from, init.to, init.session_id, init.timestamp, false)
                }
                Some("KEP_RESPONSE") => {
                    let response: KepResponse = serde_json::from_value(raw.clone())
                        .map_err(|_| StructuralError::InvalidType("KEP_RESPONSE".into()))?;
                    response.validate()?;
                    if response.seq != 2 {
                        return Err(StructuralError::InvalidType("seq".into()).into());
                    }
                    let row = MessageMeta::from_kep_response(&response)?;
                    (
                        row,
                        response.from,
                        response.to,
                        response.session_id,
                        response.timestamp,
                        true,
                    )
                }
                _ => return Err(StructuralError::InvalidType("type".into()).into()),
            };

        if from != caller {
            return Err(RelayError::SenderMismatch);
        }

        let now_ms = unix_millis();
        if let Err(error) = self.guard.check_timestamp(timestamp, now_ms) {
            self.monitor.record(AlertKind::ReplayAttempt, origin, now_ms);
            return Err(error.into());
        }
        if self.store.nonce_seen(&session_id, &row.nonce_hash).await {
            self.monitor.record(AlertKind::ReplayAttempt, origin, now_ms);
            return Err(GuardError::DuplicateNonce.into());
        }

        let message_id = row.message_id.clone();
        if let Err(error) = self.store.insert(row).await {
            self.monitor.record(AlertKind::ReplayAttempt, origin, now_ms);
            return Err(error.into());
        }

        if completes_handshake {
            // New key epoch: the data plane restarts at seq 1.
            self.store.reset_watermarks(&session_id).await;
            info!(
                event = "handshake_relayed",
                session_id = %session_id,
                "key epoch reset after KEP_RESPONSE"
            );
        }

        let delivered = self.transports.deliver_to(&to, raw).await;
        if delivered {
            self.store.mark_delivered(&message_id, now_ms).await?;
        }

        Ok(RelayAck {
            message_id,
            session_id,
            delivered,
        })
    }

    /// Undelivered, integrity-verified rows for a reconnecting user.
    pub async fn pending_for(&self, user_id: &str) -> Vec<MessageMeta> {
        self.store.pending_for(user_id).await
    }
}

/// File envelopes must carry non-empty cipher fields; an empty base64 string
/// decodes fine but cannot be a real AEAD output.
fn require_cipher_fields(envelope: &Envelope) -> Result<(), RelayError> {
    if !matches!(
        envelope.envelope_type,
        EnvelopeType::FileMeta | EnvelopeType::FileChunk
    ) {
        return Ok(());
    }
    if envelope.ciphertext.is_empty() {
        return Err(RelayError::EmptyCipherField("ciphertext"));
    }
    if envelope.iv.is_empty() {
        return Err(RelayError::EmptyCipherField("iv"));
    }
    if envelope.auth_tag.is_empty() {
        return Err(RelayError::EmptyCipherField("authTag"));
    }
    Ok(())
}
