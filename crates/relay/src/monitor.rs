//
// Copyright (c) 2025 QUIETWIRE CONTRIBUTORS
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: quietwire — End-to-end encrypted messaging with a metadata-only relay.
//

//! Threshold alerting over sliding windows.
//!
//! Counters are kept per (alert kind, subject key): decryption failures per
//! user, replay attempts per origin, signature failures per user. Crossing a
//! threshold emits one structured alert event; the window keeps sliding, so
//! sustained abuse keeps alerting.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// ≥ 5 per user per 5 minutes.
    DecryptionFailure,
    /// ≥ 3 per origin per 10 minutes.
    ReplayAttempt,
    /// ≥ 2 per user per 10 minutes.
    SignatureFailure,
}

impl AlertKind {
    fn threshold(&self) -> usize {
        match self {
            AlertKind::DecryptionFailure => 5,
            AlertKind::ReplayAttempt => 3,
            AlertKind::SignatureFailure => 2,
        }
    }

    fn window_ms(&self) -> i64 {
        match self {
            AlertKind::DecryptionFailure => 300_000,
            AlertKind::ReplayAttempt => 600_000,
            AlertKind::SignatureFailure => 600_000,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AlertKind::DecryptionFailure => "DecryptionFailed",
            AlertKind::ReplayAttempt => "ReplayAttempt",
            AlertKind::SignatureFailure => "InvalidSignature",
        }
    }
}

#[derive(Default)]
pub struct SecurityMonitor {
    windows: Mutex<HashMap<(AlertKind, String), VecDeque<i64>>>,
}

impl SecurityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one event. Returns true when this event crosses the kind's
    /// threshold within its window (an alert fired).
    pub fn record(&self, kind: AlertKind, subject: &str, now_ms: i64) -> bool {
        let mut windows = self.windows.lock().expect("monitor poisoned");
        let events = windows
            .entry((kind, subject.to_string()))
            .or_default();

        let horizon = now_ms - kind.window_ms();
        while events.front().is_some_and(|&at| at < horizon) {
            events.pop_front();
        }
        events.push_back(now_ms);

        let fired = events.len() >= kind.threshold();
        if fired {
            warn!(
                event = "security_alert",
                kind = kind.name(),
                subject,
                count = events.len(),
                window_ms = kind.window_ms(),
                "threshold alert"
            );
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_replay_threshold_is_three_per_window() {
        let monitor = SecurityMonitor::new();
        assert!(!monitor.record(AlertKind::ReplayAttempt, "10.0.0.9", NOW));
        assert!(!monitor.record(AlertKind::ReplayAttempt, "10.0.0.9", NOW + 1));
        assert!(monitor.record(AlertKind::ReplayAttempt, "10.0.0.9", NOW + 2));
    }

    #[test]
    fn test_events_age_out() {
        let monitor = SecurityMonitor::new();
        monitor.record(AlertKind::SignatureFailure, "alice", NOW);
        // The second failure lands after the first left the 10-minute window.
        assert!(!monitor.record(AlertKind::SignatureFailure, "alice", NOW + 600_001));
    }

    #[test]
    fn test_subjects_are_isolated() {
        let monitor = SecurityMonitor::new();
        for i in 0..4 {
            monitor.record(AlertKind::DecryptionFailure, "alice", NOW + i);
        }
        assert!(!monitor.record(AlertKind::DecryptionFailure, "bob", NOW + 5));
        assert!(monitor.record(AlertKind::DecryptionFailure, "alice", NOW + 6));
    }
}
