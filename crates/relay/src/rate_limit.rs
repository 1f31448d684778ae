//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Per-caller rate limits by operation class.
//!
//! Handshake traffic is tightly limited (10 per 5 minutes per caller) since
//! a legitimate client rotates keys rarely; data traffic allows 60 per
//! minute per caller. Rejections have no side effects — nothing is persisted
//! or forwarded for a limited request.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::error::RelayError;

pub struct RateLimits {
    kep: DefaultKeyedRateLimiter<String>,
    data: DefaultKeyedRateLimiter<String>,
}

impl Default for RateLimits {
    fn default() -> Self {
        // KEP: 10 per 5 min → one cell per 30 s with a burst of 10.
        let kep_quota = Quota::with_period(Duration::from_secs(30))
            .expect("non-zero period")
            .allow_burst(NonZeroU32::new(10).expect("non-zero burst"));
        let data_quota = Quota::per_minute(NonZeroU32::new(60).expect("non-zero quota"));

        Self {
            kep: RateLimiter::keyed(kep_quota),
            data: RateLimiter::keyed(data_quota),
        }
    }
}

impl RateLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_kep(&self, caller: &str) -> Result<(), RelayError> {
        self.kep
            .check_key(&caller.to_string())
            .map_err(|_| RelayError::RateLimited { class: "kep" })
    }

    pub fn check_data(&self, caller: &str) -> Result<(), RelayError> {
        self.data
            .check_key(&caller.to_string())
            .map_err(|_| RelayError::RateLimited { class: "data" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kep_burst_is_ten() {
        let limits = RateLimits::new();
        for i in 0..10 {
            assert!(limits.check_kep("alice").is_ok(), "request {i} within burst");
        }
        assert!(matches!(
            limits.check_kep("alice"),
            Err(RelayError::RateLimited { class: "kep" })
        ));

        // Other callers are unaffected.
        assert!(limits.check_kep("bob").is_ok());
    }

    #[test]
    fn test_data_burst_is_sixty() {
        let limits = RateLimits::new();
        for _ in 0..60 {
            assert!(limits.check_data("alice").is_ok());
        }
        assert!(limits.check_data("alice").is_err());
    }
}
