//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Relay service configuration loaded from environment variables.

use anyhow::Result;
use std::env;

use quietwire_core::config::CoreConfig;

/// Runtime configuration for the relay service.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// Offset the relay applies to its own clock during freshness checks.
    pub clock_offset_ms: i64,
    /// Shared protocol parameters (freshness window, skew, limits).
    pub core: CoreConfig,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse()
            .unwrap_or(3001);

        let clock_offset_ms = env::var("CLOCK_OFFSET_MS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        Ok(RelayConfig {
            port,
            clock_offset_ms,
            core: CoreConfig::from_env(),
        })
    }
}
