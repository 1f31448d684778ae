//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Shared application state for the relay HTTP layer.

use std::sync::Arc;

use crate::directory::KeyDirectory;
use crate::enforcement::RelayEngine;
use crate::monitor::SecurityMonitor;
use crate::rate_limit::RateLimits;
use crate::registry::PairRegistry;
use crate::store::InMemoryMetaStore;
use crate::transports::TransportRegistry;
use quietwire_core::guard::FreshnessConfig;

use super::config::RelayConfig;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RelayEngine<InMemoryMetaStore>>,
    pub directory: Arc<KeyDirectory>,
    pub registry: Arc<PairRegistry>,
}

impl AppState {
    /// Wire the full enforcement stack from configuration.
    pub fn from_config(config: &RelayConfig) -> Self {
        let freshness = FreshnessConfig {
            window_ms: config.core.freshness_window_ms,
            skew_ms: config.core.clock_skew_ms,
            clock_offset_ms: config.clock_offset_ms,
        };

        let engine = RelayEngine::new(
            Arc::new(InMemoryMetaStore::new()),
            Arc::new(TransportRegistry::new()),
            Arc::new(SecurityMonitor::new()),
            Arc::new(RateLimits::new()),
            freshness,
        );

        Self {
            engine: Arc::new(engine),
            directory: Arc::new(KeyDirectory::new()),
            registry: Arc::new(PairRegistry::new()),
        }
    }
}
