// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Probabilistic back-off while the ingestion endpoint is throttling.
//!
//! A throttled client does not retry on a fixed schedule. Each submission
//! attempt proceeds with a probability that grows quadratically with the time
//! since the last submission, reaching certainty after [`THROTTLE_RAMP`]. Many
//! clients throttled at the same moment therefore come back spread out.

use std::time::Duration;

use crate::constants::THROTTLE_RAMP;

/// Probability that a throttled client submits after `elapsed` since its last
/// submission: `min(1, elapsed² / ramp²)`.
#[must_use]
pub fn allow_probability(elapsed: Duration) -> f64 {
    let elapsed_ms = elapsed.as_secs_f64() * 1_000.0;
    let ramp_ms = THROTTLE_RAMP.as_secs_f64() * 1_000.0;
    ((elapsed_ms * elapsed_ms) / (ramp_ms * ramp_ms)).min(1.0)
}

/// Seedable random source for the throttle draw.
#[derive(Debug, Clone)]
pub struct ThrottleGate {
    rng: fastrand::Rng,
}

impl ThrottleGate {
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        ThrottleGate { rng }
    }

    /// Draws once and reports whether a throttled submission may proceed.
    /// Without a previous submission there is nothing to back off from.
    pub fn allows(&mut self, since_last_submit: Option<Duration>) -> bool {
        let Some(elapsed) = since_last_submit else {
            return true;
        };
        self.rng.f64() < allow_probability(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_probability_ramp() {
        assert_eq!(allow_probability(Duration::ZERO), 0.0);
        assert!((allow_probability(Duration::from_secs(30)) - 0.25).abs() < 1e-9);
        assert!(allow_probability(Duration::from_millis(59_700)) >= 0.99);
        assert_eq!(allow_probability(Duration::from_secs(60)), 1.0);
        assert_eq!(allow_probability(Duration::from_secs(600)), 1.0);
    }

    #[test]
    fn test_allow_probability_is_monotonic() {
        let mut previous = 0.0;
        for ms in (0..=60_000).step_by(500) {
            let p = allow_probability(Duration::from_millis(ms));
            assert!(p >= previous);
            previous = p;
        }
    }

    #[test]
    fn test_seeded_gate_is_deterministic() {
        let mut first = ThrottleGate::new(Some(42));
        let mut second = ThrottleGate::new(Some(42));
        for ms in (0..60_000).step_by(1_000) {
            let elapsed = Some(Duration::from_millis(ms));
            assert_eq!(first.allows(elapsed), second.allows(elapsed));
        }
    }

    #[test]
    fn test_gate_approaches_certainty() {
        let mut gate = ThrottleGate::new(Some(7));
        let early = (0..1_000)
            .filter(|_| gate.allows(Some(Duration::from_secs(6))))
            .count();
        let late = (0..1_000)
            .filter(|_| gate.allows(Some(Duration::from_millis(59_700))))
            .count();

        assert!(early < 100);
        assert!(late >= 970);
        assert!(gate.allows(Some(Duration::from_secs(60))));
        assert!(gate.allows(None));
    }
}
