//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Unified error hierarchy for the quietwire protocol engine.

use thiserror::Error;

use quietwire_types::envelope::StructuralError;
use quietwire_types::jwk::JwkError;

/// Top-level unified error type for protocol operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("structural validation failed")]
    Structural(#[from] StructuralError),

    #[error("cryptographic operation failed")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("key exchange failed")]
    Kep(#[from] crate::kep::KepError),

    #[error("session store error")]
    Session(#[from] crate::session::SessionError),

    #[error("replay/freshness guard rejected the envelope")]
    Guard(#[from] crate::guard::GuardError),

    #[error("file pipeline error")]
    File(#[from] crate::filepipe::FileError),

    #[error("envelope route does not match the session participants")]
    RouteMismatch,

    #[error("malformed public key")]
    Jwk(#[from] JwkError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
