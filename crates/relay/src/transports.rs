//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Live delivery transports.
//!
//! Wire framing (WebSocket, long-poll) is external; the relay only needs a
//! way to push a full message JSON to every live transport a user has open.
//! A message counts as delivered when at least one transport accepts it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("delivery failed: {0}")]
    SendFailed(String),
}

/// One live connection belonging to a receiver.
#[async_trait]
pub trait ReceiverTransport: Send + Sync {
    /// Push the full message JSON (envelope or KEP message) to the peer.
    async fn deliver(&self, payload: &Value) -> Result<(), TransportError>;
}

/// All live transports, keyed by user id.
#[derive(Default)]
pub struct TransportRegistry {
    inner: RwLock<HashMap<String, Vec<Arc<dyn ReceiverTransport>>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: &str, transport: Arc<dyn ReceiverTransport>) {
        let mut inner = self.inner.write().await;
        inner.entry(user_id.to_string()).or_default().push(transport);
    }

    pub async fn drop_user(&self, user_id: &str) {
        self.inner.write().await.remove(user_id);
    }

    /// Fan a payload out to every live transport of `user_id`. Returns true
    /// when at least one accepted it.
    pub async fn deliver_to(&self, user_id: &str, payload: &Value) -> bool {
        let transports = {
            let inner = self.inner.read().await;
            inner.get(user_id).cloned().unwrap_or_default()
        };

        let mut delivered = false;
        for transport in transports {
            match transport.deliver(payload).await {
                Ok(()) => delivered = true,
                Err(error) => {
                    debug!(user_id, %error, "transport refused delivery");
                }
            }
        }
        delivered
    }
}
