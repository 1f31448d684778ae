//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Runtime configuration for the protocol engine, loaded from environment
//! variables with production defaults.

use std::env;

use quietwire_types::envelope::DEFAULT_MAX_FILE_SIZE;

/// Default PBKDF2 iteration count for user-derived key material.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

/// Freshness window `W`: maximum accepted envelope age (2 minutes).
pub const DEFAULT_FRESHNESS_WINDOW_MS: i64 = 120_000;

/// Permitted clock skew `S` for future-dated envelopes (1 minute).
pub const DEFAULT_CLOCK_SKEW_MS: i64 = 60_000;

/// Minimum number of used-nonce hashes retained per session.
pub const DEFAULT_MAX_NONCE_SET_SIZE: usize = 1024;

/// Pending handshakes expire after this long.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: i64 = 30_000;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// PBKDF2 iterations for the at-rest key vault. Tests construct configs
    /// with a smaller count (5 000) instead of mutating the environment.
    pub pbkdf2_iterations: u32,
    /// Pre-encryption file size cap in bytes.
    pub max_file_size: u64,
    /// Freshness window `W` in milliseconds.
    pub freshness_window_ms: i64,
    /// Permitted clock skew `S` in milliseconds.
    pub clock_skew_ms: i64,
    /// Used-nonce retention floor per session.
    pub max_nonce_set_size: usize,
    /// Handshake expiry in milliseconds.
    pub handshake_timeout_ms: i64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            freshness_window_ms: DEFAULT_FRESHNESS_WINDOW_MS,
            clock_skew_ms: DEFAULT_CLOCK_SKEW_MS,
            max_nonce_set_size: DEFAULT_MAX_NONCE_SET_SIZE,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

impl CoreConfig {
    /// Load configuration from the environment, falling back to defaults for
    /// unset or unparsable variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pbkdf2_iterations: env_parse("CRYPTO_PBKDF2_ITERATIONS", defaults.pbkdf2_iterations),
            max_file_size: env_parse("MAX_FILE_SIZE_BYTES", defaults.max_file_size),
            freshness_window_ms: env_parse("FRESHNESS_WINDOW_MS", defaults.freshness_window_ms),
            clock_skew_ms: env_parse("CLOCK_SKEW_MS", defaults.clock_skew_ms),
            max_nonce_set_size: env_parse("MAX_NONCE_SET_SIZE", defaults.max_nonce_set_size),
            handshake_timeout_ms: env_parse(
                "HANDSHAKE_TIMEOUT_MS",
                defaults.handshake_timeout_ms,
            ),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.pbkdf2_iterations, 100_000);
        assert_eq!(config.max_file_size, 100 * 1024 * 1024);
        assert_eq!(config.freshness_window_ms, 120_000);
        assert_eq!(config.clock_skew_ms, 60_000);
        assert_eq!(config.max_nonce_set_size, 1024);
    }

    #[test]
    fn test_env_override() {
        // Distinct variable name to avoid cross-test interference.
        std::env::set_var("FRESHNESS_WINDOW_MS", "5000");
        let config = CoreConfig::from_env();
        assert_eq!(config.freshness_window_ms, 5000);
        std::env::remove_var("FRESHNESS_WINDOW_MS");
    }
}
