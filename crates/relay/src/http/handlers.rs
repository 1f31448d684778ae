//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! HTTP endpoint handlers for the relay service.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::directory::StoredIdentityKey;
use crate::enforcement::RelayAck;
use crate::error::RelayError;
use crate::registry::SessionRecord;
use crate::store::StoreError;
use quietwire_core::guard::unix_millis;
use quietwire_types::jwk::EcPublicJwk;
use quietwire_types::meta::MessageMeta;

use super::identity::CallerIdentity;
use super::state::AppState;

/// Wire shape of the transport `error` event.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub timestamp: i64,
}

pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn forbidden(message: &str) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            body: ErrorBody {
                code: "Forbidden".to_string(),
                message: message.to_string(),
                timestamp: Utc::now().timestamp_millis(),
            },
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(error: RelayError) -> Self {
        let status = match &error {
            RelayError::Structural(_) | RelayError::EmptyCipherField(_) | RelayError::Meta(_) => {
                StatusCode::BAD_REQUEST
            }
            RelayError::Guard(_) => StatusCode::CONFLICT,
            RelayError::Store(StoreError::DuplicateNonce { .. })
            | RelayError::Store(StoreError::DuplicateSeqTimestamp { .. }) => StatusCode::CONFLICT,
            RelayError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            RelayError::SenderMismatch => StatusCode::FORBIDDEN,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::MetadataTamperDetected => StatusCode::CONFLICT,
            RelayError::UnknownKey(_) => StatusCode::NOT_FOUND,
        };

        Self {
            status,
            body: ErrorBody {
                code: error.code().to_string(),
                message: error.to_string(),
                timestamp: Utc::now().timestamp_millis(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// GET /healthz — service health status.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub user_id_1: String,
    pub user_id_2: String,
}

/// POST /sessions — return the singleton session record for a pair,
/// creating it on first use. Racing creations converge silently.
pub async fn create_session_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<SessionRecord>, ApiError> {
    if caller.user_id != request.user_id_1 && caller.user_id != request.user_id_2 {
        return Err(ApiError::forbidden("caller is not a participant"));
    }

    let record = state
        .registry
        .ensure(&request.user_id_1, &request.user_id_2, unix_millis())
        .await;
    Ok(Json(record))
}

// ---------------------------------------------------------------------------
// Data plane
// ---------------------------------------------------------------------------

/// POST /messages/relay — REST fallback for `msg:send`. The body is the full
/// envelope JSON; the response is the `msg:sent` acknowledgment.
pub async fn relay_message_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(raw): Json<Value>,
) -> Result<Json<RelayAck>, ApiError> {
    let ack = state
        .engine
        .relay_envelope(&caller.user_id, &caller.origin, &raw)
        .await?;
    Ok(Json(ack))
}

/// POST /kep/relay — REST fallback for `kep:init` / `kep:response`.
pub async fn relay_kep_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(raw): Json<Value>,
) -> Result<Json<RelayAck>, ApiError> {
    let ack = state
        .engine
        .relay_kep(&caller.user_id, &caller.origin, &raw)
        .await?;
    Ok(Json(ack))
}

/// GET /messages/pending/:userId — undelivered MessageMeta rows only, each
/// integrity-verified before it leaves the store.
pub async fn pending_messages_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<MessageMeta>>, ApiError> {
    if caller.user_id != user_id {
        warn!(
            caller = %caller.user_id,
            requested = %user_id,
            "pending-message fetch for another user refused"
        );
        return Err(ApiError::forbidden("cannot read another user's queue"));
    }

    Ok(Json(state.engine.pending_for(&user_id).await))
}

// ---------------------------------------------------------------------------
// Key directory
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UploadKeyRequest {
    #[serde(rename = "publicIdentityKeyJWK")]
    pub public_identity_key_jwk: EcPublicJwk,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadKeyResponse {
    pub user_id: String,
    pub key_hash: String,
}

/// POST /keys/upload — store the caller's public identity key with its
/// content hash for tamper detection.
pub async fn upload_key_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<UploadKeyRequest>,
) -> Result<Json<UploadKeyResponse>, ApiError> {
    let key_hash = state
        .directory
        .upload(
            &caller.user_id,
            request.public_identity_key_jwk,
            unix_millis(),
        )
        .await?;

    Ok(Json(UploadKeyResponse {
        user_id: caller.user_id,
        key_hash,
    }))
}

/// GET /keys/:userId — fetch a user's identity key; tampered entries are
/// withheld.
pub async fn fetch_key_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<StoredIdentityKey>, ApiError> {
    Ok(Json(state.directory.fetch(&user_id).await?))
}
