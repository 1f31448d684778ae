//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! quietwire relay — thin entry point for the Axum HTTP service.
//!
//! All routing and enforcement logic lives in `quietwire_relay`. This binary
//! only loads env config, wires AppState, binds the listener, and serves.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use quietwire_relay::http::{create_router, AppState, RelayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::from_env()?;

    tracing::info!(
        "quietwire-relay v{} starting on port {}",
        env!("CARGO_PKG_VERSION"),
        config.port
    );
    tracing::info!(
        freshness_window_ms = config.core.freshness_window_ms,
        clock_skew_ms = config.core.clock_skew_ms,
        max_file_size = config.core.max_file_size,
        "protocol parameters loaded"
    );

    let state = AppState::from_config(&config);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
