//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! # quietwire core
//!
//! The cryptographic protocol engine shared by the sending and receiving
//! sides of quietwire: a signed ECDH handshake (KEP) establishing per-pair
//! sessions with directional AES-256-GCM keys, authenticated message and
//! file envelopes, and symmetric replay/freshness enforcement.
//!
//! ## Architecture
//!
//! - [`crypto`] — AEAD, ECDH/ECDSA on P-256, HKDF, HMAC, PBKDF2, identity
//!   and ephemeral keypairs
//! - [`secret`] — zeroizing secret wrappers and directional key handles
//! - [`kep`] — the two-message signed handshake state machine
//! - [`session`] — per-pair session records and the session store
//! - [`guard`] — timestamp windowing, nonce deduplication, sequence
//!   monotonicity
//! - [`filepipe`] — chunked file encryption and ordered reassembly
//! - [`engine`] — the send/receive pipelines binding the above together
//! - [`vault`] — at-rest encryption of session key material
//! - [`config`] — environment-driven runtime configuration
//!
//! ## Quick start
//!
//! ```rust
//! use quietwire_core::crypto::IdentityKeypair;
//! use quietwire_core::config::CoreConfig;
//! use quietwire_core::kep::{KepInitiator, respond};
//! use quietwire_core::guard::unix_millis;
//!
//! # fn main() -> Result<(), quietwire_core::ProtocolError> {
//! let config = CoreConfig::default();
//! let alice_identity = IdentityKeypair::generate();
//! let bob_identity = IdentityKeypair::generate();
//! let now = unix_millis();
//!
//! // Alice opens the handshake; Bob responds; both install a session.
//! let mut initiator = KepInitiator::new("alice", "bob");
//! let init = initiator.start(&alice_identity, now)?;
//! let (response, bob_session) = respond(
//!     &bob_identity, "bob", &alice_identity.public_jwk(), &init, now, &config,
//! )?;
//! let alice_session = initiator.handle_response(
//!     &bob_identity.public_jwk(), &response, now, &config,
//! )?;
//! assert_eq!(alice_session.session_id, bob_session.session_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod filepipe;
pub mod guard;
pub mod kep;
pub mod secret;
pub mod session;
pub mod vault;

pub use config::CoreConfig;
pub use crypto::{
    decrypt_aead, encrypt_aead, AeadSealed, CryptoError, EphemeralKeypair, IdentityKeypair,
};
pub use engine::{DecryptedEnvelope, MessageEngine};
pub use error::ProtocolError;
pub use filepipe::{
    decrypt_file, encrypt_file, DecryptedFile, EnvelopeRoute, FileError, FileSource,
};
pub use guard::{unix_millis, FreshnessConfig, GuardError, ReplayGuard};
pub use kep::{InitiatorState, KepError, KepInitiator};
pub use secret::{RecvKey, SecretBytes, SendKey};
pub use session::{
    session_id_for, InMemorySessionStore, Session, SessionError, SessionStore,
};
pub use vault::{KeyVault, VaultRecord};

// Wire-level length contracts live with the codec; re-exported here because
// every layer of the engine speaks in them.
pub use quietwire_types::envelope::{
    CHUNK_SIZE, DEFAULT_MAX_FILE_SIZE, IV_LEN, NONCE_MAX_LEN, NONCE_MIN_LEN, TAG_LEN,
};
