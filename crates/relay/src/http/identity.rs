//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Caller identity middleware.
//!
//! User authentication (password handling, JWT issuance and validation) is
//! an external collaborator terminated in front of this service. The
//! terminating layer injects the verified user id as the `x-quietwire-user`
//! header; this middleware lifts it into request extensions and rejects
//! anonymous requests. The enforcement layer then binds `sender == caller`.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;

/// Verified caller, injected into request extensions.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: String,
    /// Reported network origin, for per-origin alert thresholds.
    pub origin: String,
}

pub const CALLER_HEADER: &str = "x-quietwire-user";

pub async fn identity_middleware(mut request: Request, next: Next) -> Response {
    let user_id = request
        .headers()
        .get(CALLER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let Some(user_id) = user_id else {
        let body = json!({
            "code": "Unauthenticated",
            "message": "caller identity missing",
            "timestamp": Utc::now().timestamp_millis(),
        });
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    };

    let origin = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').next().unwrap_or(value).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    request
        .extensions_mut()
        .insert(CallerIdentity { user_id, origin });
    next.run(request).await
}
