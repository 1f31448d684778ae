//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! The Key Exchange Protocol (KEP) state machine.
//!
//! A two-message signed ECDH handshake: the initiator sends a `KEP_INIT`
//! carrying a fresh ephemeral P-256 key signed by its identity key; the
//! responder verifies the signature, contributes its own signed ephemeral
//! key, derives the session keys, and proves possession of the root key with
//! an HMAC key confirmation. Both sides end holding mirrored directional
//! keys (one peer's send key is the other's receive key).
//!
//! Any failure is fatal to the handshake — no partial state survives, and
//! the pending ephemeral secret is destroyed. Repeating a handshake is
//! allowed; the newest session supersedes the old one for the pair.
//!
//! Key schedule (HKDF-SHA-256):
//!
//! ```text
//! rootKey   = HKDF(shared,  salt="ROOT", info=sessionId, 32)
//! K_self→peer = HKDF(rootKey, salt="SEND", info=selfUserId, 32)
//! K_peer→self = HKDF(rootKey, salt="SEND", info=peerUserId, 32)
//! ```
//!
//! Keying the "SEND" expansion by the sender's user id gives both sides the
//! same two keys with mirrored roles, without a separate "RECV" label.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;
use tracing::warn;

use crate::config::CoreConfig;
use crate::crypto::{
    hkdf32, hmac_sha256, hmac_verify, random_bytes, verify_canonical_signature, CryptoError,
    EphemeralKeypair, IdentityKeypair,
};
use crate::guard::{FreshnessConfig, GuardError, ReplayGuard};
use crate::secret::{RecvKey, SecretBytes, SendKey};
use crate::session::{session_id_for, Session};
use quietwire_types::envelope::StructuralError;
use quietwire_types::jwk::{EcPublicJwk, JwkError};
use quietwire_types::kep::{KepInit, KepMessageType, KepResponse};

const SALT_ROOT: &[u8] = b"ROOT";
const SALT_SEND: &[u8] = b"SEND";
const CONFIRM_PREFIX: &str = "CONFIRM:";

/// KEP replay tokens are 16 random bytes.
const KEP_NONCE_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum KepError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("handshake signature verification failed")]
    InvalidSignature,

    #[error("key confirmation mismatch")]
    KeyConfirmationMismatch,

    #[error("handshake message failed freshness validation")]
    Freshness(#[from] GuardError),

    #[error("handshake is in state {actual}, operation requires {expected}")]
    StateMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("handshake expired before the response arrived")]
    Expired,

    #[error("handshake message names an unexpected peer")]
    PeerMismatch,

    #[error("session id does not match the participant pair")]
    SessionIdMismatch,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Jwk(#[from] JwkError),
}

/// Initiator-side handshake states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorState {
    Idle,
    AwaitingResponse,
    Established,
    Failed,
}

impl InitiatorState {
    fn name(&self) -> &'static str {
        match self {
            InitiatorState::Idle => "Idle",
            InitiatorState::AwaitingResponse => "AwaitingResponse",
            InitiatorState::Established => "Established",
            InitiatorState::Failed => "Failed",
        }
    }
}

struct PendingHandshake {
    ephemeral: EphemeralKeypair,
    started_at_ms: i64,
}

/// Initiator half of the handshake: `Idle → AwaitingResponse →
/// Established | Failed`.
pub struct KepInitiator {
    self_id: String,
    peer_id: String,
    session_id: String,
    state: InitiatorState,
    pending: Option<PendingHandshake>,
}

impl KepInitiator {
    pub fn new(self_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        let self_id = self_id.into();
        let peer_id = peer_id.into();
        let session_id = session_id_for(&self_id, &peer_id);
        Self {
            self_id,
            peer_id,
            session_id,
            state: InitiatorState::Idle,
            pending: None,
        }
    }

    pub fn state(&self) -> InitiatorState {
        self.state
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Open the handshake: generate the ephemeral keypair, sign its JWK with
    /// the identity key, and emit `KEP_INIT` with `seq=1`.
    pub fn start(
        &mut self,
        identity: &IdentityKeypair,
        now_ms: i64,
    ) -> Result<KepInit, KepError> {
        if self.state != InitiatorState::Idle {
            return Err(KepError::StateMismatch {
                expected: "Idle",
                actual: self.state.name(),
            });
        }

        let ephemeral = EphemeralKeypair::generate();
        let eph_pub = ephemeral.public_jwk();
        let signature = identity.sign_canonical(&eph_pub)?;

        let init = KepInit {
            msg_type: KepMessageType::Init,
            from: self.self_id.clone(),
            to: self.peer_id.clone(),
            session_id: self.session_id.clone(),
            eph_pub,
            signature,
            timestamp: now_ms,
            seq: 1,
            nonce: BASE64.encode(random_bytes(KEP_NONCE_LEN)),
        };

        self.pending = Some(PendingHandshake {
            ephemeral,
            started_at_ms: now_ms,
        });
        self.state = InitiatorState::AwaitingResponse;

        Ok(init)
    }

    /// Consume the peer's `KEP_RESPONSE` and install the session, or fail
    /// terminally. The retained ephemeral secret is destroyed on every exit
    /// path.
    pub fn handle_response(
        &mut self,
        peer_identity: &EcPublicJwk,
        response: &KepResponse,
        now_ms: i64,
        config: &CoreConfig,
    ) -> Result<Session, KepError> {
        if self.state != InitiatorState::AwaitingResponse {
            return Err(KepError::StateMismatch {
                expected: "AwaitingResponse",
                actual: self.state.name(),
            });
        }

        match self.try_complete(peer_identity, response, now_ms, config) {
            Ok(session) => {
                self.state = InitiatorState::Established;
                Ok(session)
            }
            Err(error) => {
                // Fatal: drop the pending ephemeral so nothing survives.
                self.pending = None;
                self.state = InitiatorState::Failed;
                Err(error)
            }
        }
    }

    fn try_complete(
        &mut self,
        peer_identity: &EcPublicJwk,
        response: &KepResponse,
        now_ms: i64,
        config: &CoreConfig,
    ) -> Result<Session, KepError> {
        let pending = self.pending.as_ref().ok_or(KepError::StateMismatch {
            expected: "AwaitingResponse",
            actual: self.state.name(),
        })?;

        if now_ms - pending.started_at_ms > config.handshake_timeout_ms {
            return Err(KepError::Expired);
        }

        response.validate()?;
        if response.from != self.peer_id || response.to != self.self_id {
            return Err(KepError::PeerMismatch);
        }
        if response.session_id != self.session_id {
            return Err(KepError::SessionIdMismatch);
        }

        ReplayGuard::new(FreshnessConfig::from_core(config))
            .check_timestamp(response.timestamp, now_ms)?;

        if !verify_canonical_signature(peer_identity, &response.signature, &response.eph_pub)? {
            warn!(
                event = "kep_failure",
                kind = "InvalidSignature",
                session_id = %self.session_id,
                peer = %self.peer_id,
                "KEP_RESPONSE signature rejected"
            );
            return Err(KepError::InvalidSignature);
        }

        let peer_eph = response.eph_pub.to_public_key()?;
        let pending = self.pending.take().ok_or(KepError::StateMismatch {
            expected: "AwaitingResponse",
            actual: self.state.name(),
        })?;
        let shared = pending.ephemeral.derive(&peer_eph)?;

        let keys = derive_session_keys(&shared, &self.session_id, &self.self_id, &self.peer_id)?;

        // Constant-time check that the responder derived the same root key.
        let confirmation = BASE64
            .decode(&response.key_confirmation)
            .map_err(|_| KepError::KeyConfirmationMismatch)?;
        let confirm_input = format!("{CONFIRM_PREFIX}{}", self.self_id);
        if !hmac_verify(
            keys.root.expose(),
            confirm_input.as_bytes(),
            &confirmation,
        )? {
            warn!(
                event = "kep_failure",
                kind = "KeyConfirmationMismatch",
                session_id = %self.session_id,
                "key confirmation rejected"
            );
            return Err(KepError::KeyConfirmationMismatch);
        }

        Ok(Session::new(
            self.self_id.clone(),
            self.peer_id.clone(),
            keys.root,
            SendKey::from_secret(keys.self_send),
            RecvKey::from_secret(keys.peer_send),
            now_ms,
        ))
    }
}

/// Responder half: validate a `KEP_INIT`, derive keys, and emit the signed
/// `KEP_RESPONSE` (`seq=2`) together with the installed-side session.
/// `Idle → Established | Failed` in a single step.
pub fn respond(
    identity: &IdentityKeypair,
    self_id: &str,
    peer_identity: &EcPublicJwk,
    init: &KepInit,
    now_ms: i64,
    config: &CoreConfig,
) -> Result<(KepResponse, Session), KepError> {
    init.validate()?;
    if init.to != self_id {
        return Err(KepError::PeerMismatch);
    }
    if init.session_id != session_id_for(&init.from, self_id) {
        return Err(KepError::SessionIdMismatch);
    }

    ReplayGuard::new(FreshnessConfig::from_core(config)).check_timestamp(init.timestamp, now_ms)?;

    if !verify_canonical_signature(peer_identity, &init.signature, &init.eph_pub)? {
        warn!(
            event = "kep_failure",
            kind = "InvalidSignature",
            session_id = %init.session_id,
            peer = %init.from,
            "KEP_INIT signature rejected"
        );
        return Err(KepError::InvalidSignature);
    }

    let peer_eph = init.eph_pub.to_public_key()?;
    let ephemeral = EphemeralKeypair::generate();
    let eph_pub = ephemeral.public_jwk();
    let signature = identity.sign_canonical(&eph_pub)?;

    // Derivation consumes the ephemeral secret; it is zeroized here.
    let shared = ephemeral.derive(&peer_eph)?;
    let keys = derive_session_keys(&shared, &init.session_id, self_id, &init.from)?;

    let confirm_input = format!("{CONFIRM_PREFIX}{}", init.from);
    let confirmation = hmac_sha256(keys.root.expose(), confirm_input.as_bytes())?;

    let response = KepResponse {
        msg_type: KepMessageType::Response,
        from: self_id.to_string(),
        to: init.from.clone(),
        session_id: init.session_id.clone(),
        eph_pub,
        signature,
        key_confirmation: BASE64.encode(confirmation),
        timestamp: now_ms,
        seq: 2,
        nonce: BASE64.encode(random_bytes(KEP_NONCE_LEN)),
    };

    let session = Session::new(
        self_id,
        init.from.clone(),
        keys.root,
        SendKey::from_secret(keys.self_send),
        RecvKey::from_secret(keys.peer_send),
        now_ms,
    );

    Ok((response, session))
}

struct SessionKeys {
    root: SecretBytes,
    /// `K_self→peer`: what this side sends with.
    self_send: SecretBytes,
    /// `K_peer→self`: what this side receives with.
    peer_send: SecretBytes,
}

fn derive_session_keys(
    shared: &SecretBytes,
    session_id: &str,
    self_id: &str,
    peer_id: &str,
) -> Result<SessionKeys, KepError> {
    let root = hkdf32(shared.expose(), SALT_ROOT, session_id.as_bytes())?;
    let self_send = hkdf32(root.expose(), SALT_SEND, self_id.as_bytes())?;
    let peer_send = hkdf32(root.expose(), SALT_SEND, peer_id.as_bytes())?;
    Ok(SessionKeys {
        root,
        self_send,
        peer_send,
    })
}
