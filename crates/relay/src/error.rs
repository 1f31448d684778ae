//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Relay-side error hierarchy and wire error codes.

use thiserror::Error;

use crate::store::StoreError;
use quietwire_core::guard::GuardError;
use quietwire_types::envelope::StructuralError;
use quietwire_types::meta::MetaError;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("sender does not match the authenticated caller")]
    SenderMismatch,

    #[error("rate limit exceeded for {class}")]
    RateLimited { class: &'static str },

    #[error("stored metadata failed integrity verification")]
    MetadataTamperDetected,

    #[error("field {0} must carry non-empty base64 for file envelopes")]
    EmptyCipherField(&'static str),

    #[error("no identity key uploaded for user {0}")]
    UnknownKey(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Meta(#[from] MetaError),
}

impl RelayError {
    /// Stable error code for the transport `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Structural(_) => "StructuralInvalid",
            RelayError::Guard(guard) => guard.kind(),
            RelayError::SenderMismatch => "SenderMismatch",
            RelayError::RateLimited { .. } => "RateLimited",
            RelayError::MetadataTamperDetected => "MetadataTamperDetected",
            RelayError::EmptyCipherField(_) => "StructuralInvalid",
            RelayError::UnknownKey(_) => "UnknownKey",
            RelayError::Store(StoreError::DuplicateNonce { .. }) => "DuplicateNonce",
            RelayError::Store(StoreError::DuplicateSeqTimestamp { .. }) => "SeqReplay",
            RelayError::Store(_) => "StoreError",
            RelayError::Meta(_) => "StructuralInvalid",
        }
    }
}
