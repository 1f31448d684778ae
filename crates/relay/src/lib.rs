//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! # quietwire relay
//!
//! The relay validates, records, and forwards envelopes without ever seeing
//! plaintext or key material. Its persistence contract is metadata-only:
//! rows carry routing fields, a nonce hash, and an integrity hash — no
//! ciphertext, IVs, auth tags, or raw nonces. Replay and freshness policy is
//! enforced symmetrically with the receiving client, backed by unique
//! indexes on `(sessionId, nonceHash)` and `(sessionId, seq, timestamp)`
//! that turn concurrent races into typed rejections.
//!
//! Authentication of callers (JWT issuance, password handling) is an
//! external collaborator: the HTTP layer trusts the caller identity injected
//! by the terminating proxy and only enforces `sender == caller`.

pub mod directory;
pub mod enforcement;
pub mod error;
pub mod http;
pub mod monitor;
pub mod rate_limit;
pub mod registry;
pub mod store;
pub mod transports;

pub use directory::KeyDirectory;
pub use enforcement::{RelayAck, RelayEngine};
pub use error::RelayError;
pub use monitor::{AlertKind, SecurityMonitor};
pub use rate_limit::RateLimits;
pub use registry::PairRegistry;
pub use store::{InMemoryMetaStore, MetaStore, StoreError};
pub use transports::{ReceiverTransport, TransportError, TransportRegistry};
