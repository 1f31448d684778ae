//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Axum router composition for the relay service.
//!
//! Routes:
//!   POST  /sessions                    — singleton session record per pair
//!   POST  /messages/relay              — REST fallback for msg:send
//!   POST  /kep/relay                   — REST fallback for kep:init / kep:response
//!   GET   /messages/pending/:user_id   — undelivered MessageMeta only
//!   POST  /keys/upload                 — identity key upload with keyHash
//!   GET   /keys/:user_id               — identity key fetch with verification
//!   GET   /healthz                     — health check (unauthenticated)

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_session_handler, fetch_key_handler, health_handler, pending_messages_handler,
    relay_kep_handler, relay_message_handler, upload_key_handler,
};
use super::identity::identity_middleware;
use super::state::AppState;

/// Compose the full relay router. Every route except the health check goes
/// through the caller-identity middleware.
pub fn create_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/sessions", post(create_session_handler))
        .route("/messages/relay", post(relay_message_handler))
        .route("/kep/relay", post(relay_kep_handler))
        .route("/messages/pending/:user_id", get(pending_messages_handler))
        .route("/keys/upload", post(upload_key_handler))
        .route("/keys/:user_id", get(fetch_key_handler))
        .layer(middleware::from_fn(identity_middleware));

    Router::new()
        .merge(authenticated)
        .route("/healthz", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
