//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Axum HTTP layer for the relay: REST fallback for the data plane, the key
//! directory, session bootstrap, and pending-message retrieval.

pub mod config;
pub mod handlers;
pub mod identity;
pub mod router;
pub mod state;

pub use config::RelayConfig;
pub use identity::CallerIdentity;
pub use router::create_router;
pub use state::AppState;
