//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Replay and freshness enforcement.
//!
//! The guard applies the same ordered policy on the relay and on the
//! receiving client: nonce structure, timestamp window, nonce-hash
//! uniqueness, strict sequence monotonicity. It only *checks*; committing an
//! accepted envelope (recording the nonce hash and advancing the peer
//! sequence) is the caller's job, under the session receive-lock, and must
//! happen only after the payload actually decrypts.
//!
//! Every rejection emits a structured `replay_attempt` event.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::config::CoreConfig;
use quietwire_types::envelope::{NONCE_MAX_LEN, NONCE_MIN_LEN};

/// Milliseconds since the UNIX epoch.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("nonce is malformed or outside {NONCE_MIN_LEN}..={NONCE_MAX_LEN} bytes")]
    InvalidNonce,

    #[error("timestamp outside freshness window (age {age_ms} ms)")]
    TimestampOutOfWindow { age_ms: i64 },

    #[error("nonce already used in this session")]
    DuplicateNonce,

    #[error("sequence {seq} not greater than last accepted {last}")]
    SeqNotMonotonic { seq: u64, last: u64 },
}

impl GuardError {
    /// Short kind tag for structured logs and relay error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::InvalidNonce => "InvalidNonce",
            GuardError::TimestampOutOfWindow { .. } => "TimestampOutOfWindow",
            GuardError::DuplicateNonce => "DuplicateNonce",
            GuardError::SeqNotMonotonic { .. } => "SeqNotMonotonic",
        }
    }
}

/// Freshness policy parameters.
///
/// `age = (now + clock_offset) − timestamp` is accepted iff
/// `−(window + skew) ≤ age ≤ window`: an envelope may be up to `window` old,
/// and up to `window + skew` in the future to absorb sender clock skew. The
/// asymmetry is deliberate and preserved from the protocol definition.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessConfig {
    pub window_ms: i64,
    pub skew_ms: i64,
    /// Additional offset a relay may apply to its own clock.
    pub clock_offset_ms: i64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self::from_core(&CoreConfig::default())
    }
}

impl FreshnessConfig {
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            window_ms: config.freshness_window_ms,
            skew_ms: config.clock_skew_ms,
            clock_offset_ms: 0,
        }
    }
}

/// The ordered replay/freshness checks of the protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayGuard {
    config: FreshnessConfig,
}

impl ReplayGuard {
    pub fn new(config: FreshnessConfig) -> Self {
        Self { config }
    }

    /// Timestamp-only check, shared with the KEP handshake validation.
    pub fn check_timestamp(&self, timestamp: i64, now_ms: i64) -> Result<(), GuardError> {
        let age_ms = now_ms + self.config.clock_offset_ms - timestamp;
        let lower = -(self.config.window_ms + self.config.skew_ms);
        if age_ms < lower || age_ms > self.config.window_ms {
            return Err(GuardError::TimestampOutOfWindow { age_ms });
        }
        Ok(())
    }

    /// Run checks 1–4 in order against one inbound envelope.
    ///
    /// `nonce_seen` answers whether a nonce hash was already accepted in the
    /// session (client: the session's used set; relay: the persisted rows).
    /// On success the computed nonce hash is returned for the caller to
    /// commit; nothing is mutated here.
    pub fn precheck(
        &self,
        session_id: &str,
        nonce_b64: &str,
        timestamp: i64,
        seq: u64,
        peer_last_seq: u64,
        nonce_seen: impl FnOnce(&str) -> bool,
        now_ms: i64,
    ) -> Result<String, GuardError> {
        let result = self.run_checks(
            nonce_b64,
            timestamp,
            seq,
            peer_last_seq,
            nonce_seen,
            now_ms,
        );

        if let Err(ref error) = result {
            warn!(
                event = "replay_attempt",
                kind = error.kind(),
                session_id,
                seq,
                "envelope rejected by replay guard"
            );
        }

        result
    }

    fn run_checks(
        &self,
        nonce_b64: &str,
        timestamp: i64,
        seq: u64,
        peer_last_seq: u64,
        nonce_seen: impl FnOnce(&str) -> bool,
        now_ms: i64,
    ) -> Result<String, GuardError> {
        // 1. Nonce structure.
        let raw_nonce = BASE64
            .decode(nonce_b64)
            .map_err(|_| GuardError::InvalidNonce)?;
        if raw_nonce.len() < NONCE_MIN_LEN || raw_nonce.len() > NONCE_MAX_LEN {
            return Err(GuardError::InvalidNonce);
        }

        // 2. Timestamp freshness.
        self.check_timestamp(timestamp, now_ms)?;

        // 3. Nonce uniqueness, by hash.
        let nonce_hash = hex::encode(Sha256::digest(&raw_nonce));
        if nonce_seen(&nonce_hash) {
            return Err(GuardError::DuplicateNonce);
        }

        // 4. Strict sequence monotonicity. Gaps are fine; equal or lower is
        //    replay.
        if seq <= peer_last_seq {
            return Err(GuardError::SeqNotMonotonic {
                seq,
                last: peer_last_seq,
            });
        }

        Ok(nonce_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;
    const W: i64 = 120_000;
    const S: i64 = 60_000;

    fn guard() -> ReplayGuard {
        ReplayGuard::new(FreshnessConfig {
            window_ms: W,
            skew_ms: S,
            clock_offset_ms: 0,
        })
    }

    fn nonce() -> String {
        BASE64.encode([0x42u8; 16])
    }

    fn precheck(
        guard: &ReplayGuard,
        timestamp: i64,
        seq: u64,
        last: u64,
        seen: bool,
    ) -> Result<String, GuardError> {
        guard.precheck("s", &nonce(), timestamp, seq, last, |_| seen, NOW)
    }

    #[test]
    fn test_accepts_fresh_envelope() {
        let hash = precheck(&guard(), NOW, 1, 0, false).unwrap();
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_timestamp_boundaries() {
        let g = guard();
        // Exactly W old: accepted. One millisecond older: rejected.
        assert!(precheck(&g, NOW - W, 1, 0, false).is_ok());
        assert_eq!(
            precheck(&g, NOW - W - 1, 1, 0, false),
            Err(GuardError::TimestampOutOfWindow { age_ms: W + 1 })
        );

        // Future-dated up to W + S: accepted. Beyond: rejected.
        assert!(precheck(&g, NOW + W + S, 1, 0, false).is_ok());
        assert_eq!(
            precheck(&g, NOW + W + S + 1, 1, 0, false),
            Err(GuardError::TimestampOutOfWindow {
                age_ms: -(W + S + 1)
            })
        );
    }

    #[test]
    fn test_clock_offset_shifts_window() {
        let g = ReplayGuard::new(FreshnessConfig {
            window_ms: W,
            skew_ms: S,
            clock_offset_ms: 30_000,
        });
        // With the relay clock 30 s ahead, an envelope exactly W old by the
        // raw clock is now past the window.
        assert!(g
            .precheck("s", &nonce(), NOW - W, 1, 0, |_| false, NOW)
            .is_err());
    }

    #[test]
    fn test_nonce_length_gate() {
        let g = guard();
        for (len, ok) in [(11usize, false), (12, true), (32, true), (33, false)] {
            let nonce_b64 = BASE64.encode(vec![1u8; len]);
            let result = g.precheck("s", &nonce_b64, NOW, 1, 0, |_| false, NOW);
            assert_eq!(result.is_ok(), ok, "nonce length {len}");
        }
        assert_eq!(
            g.precheck("s", "@@not-base64@@", NOW, 1, 0, |_| false, NOW),
            Err(GuardError::InvalidNonce)
        );
    }

    #[test]
    fn test_duplicate_nonce_rejected() {
        assert_eq!(
            precheck(&guard(), NOW, 8, 7, true),
            Err(GuardError::DuplicateNonce)
        );
    }

    #[test]
    fn test_seq_must_strictly_increase() {
        let g = guard();
        assert_eq!(
            precheck(&g, NOW, 7, 7, false),
            Err(GuardError::SeqNotMonotonic { seq: 7, last: 7 })
        );
        assert_eq!(
            precheck(&g, NOW, 3, 7, false),
            Err(GuardError::SeqNotMonotonic { seq: 3, last: 7 })
        );
        // Gaps are permitted.
        assert!(precheck(&g, NOW, 20, 7, false).is_ok());
    }

    #[test]
    fn test_check_order_nonce_before_seq() {
        // A replayed envelope trips DuplicateNonce before SeqNotMonotonic.
        assert_eq!(
            precheck(&guard(), NOW, 7, 7, true),
            Err(GuardError::DuplicateNonce)
        );
    }

    #[test]
    fn test_stale_timestamp_beats_nonce_check() {
        // Ordering: timestamp is checked before the nonce set is consulted.
        assert_eq!(
            precheck(&guard(), NOW - 180_000, 9, 7, true),
            Err(GuardError::TimestampOutOfWindow { age_ms: 180_000 })
        );
    }
}
