// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration.
//!
//! Values come from, in increasing priority: the defaults below, whatever the
//! host deserializes (`Config` implements `Deserialize` with every field
//! optional), and `ANALYTICS_*` environment variables applied by
//! [`Config::with_env_overrides`].
//!
//! - Zero intervals fall back to their defaults.
//! - `batch_size_limit` is clamped below the batch hard cap.
//! - Unparseable environment values are ignored with a warning.

use std::env;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::constants::{
    BATCH_HARD_CAP_BYTES, DEFAULT_AUTO_SUBMIT_INTERVAL, DEFAULT_BATCH_SIZE_LIMIT,
    DEFAULT_IN_FLIGHT_TIMEOUT,
};
use crate::event::{Attributes, Metrics};

const ENV_AUTO_SUBMIT_EVENTS: &str = "ANALYTICS_AUTO_SUBMIT_EVENTS";
const ENV_AUTO_SUBMIT_INTERVAL_MS: &str = "ANALYTICS_AUTO_SUBMIT_INTERVAL_MS";
const ENV_BATCH_SIZE_LIMIT: &str = "ANALYTICS_BATCH_SIZE_LIMIT";
const ENV_IN_FLIGHT_TIMEOUT_MS: &str = "ANALYTICS_IN_FLIGHT_TIMEOUT_MS";
const ENV_LOG_TIMESTAMPS: &str = "ANALYTICS_LOG_TIMESTAMPS";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Arm the auto-submit timer on every submission pass.
    pub auto_submit_events: bool,
    pub auto_submit_interval_ms: u64,
    /// Preferred batch size in bytes.
    pub batch_size_limit: usize,
    /// How long a dispatched batch may go without a response before it is
    /// released from the in-flight set.
    pub in_flight_timeout_ms: u64,
    /// Attached to every recorded event unless the event sets the same name.
    pub global_attributes: Attributes,
    pub global_metrics: Metrics,
    /// Seed for the throttle draw; random when unset.
    pub random_seed: Option<u64>,
    /// Start lines written by [`crate::logger::Formatter`] with a UTC timestamp.
    pub log_timestamps: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            auto_submit_events: true,
            auto_submit_interval_ms: millis(DEFAULT_AUTO_SUBMIT_INTERVAL),
            batch_size_limit: DEFAULT_BATCH_SIZE_LIMIT,
            in_flight_timeout_ms: millis(DEFAULT_IN_FLIGHT_TIMEOUT),
            global_attributes: Attributes::new(),
            global_metrics: Metrics::new(),
            random_seed: None,
            log_timestamps: true,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Defaults overridden by the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| env::var(key).ok())
    }

    /// Applies `ANALYTICS_*` overrides read through `lookup`.
    #[must_use]
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_AUTO_SUBMIT_EVENTS) {
            self.auto_submit_events = value.trim().to_lowercase() != "false";
        }
        if let Some(value) = parse_env(&lookup, ENV_AUTO_SUBMIT_INTERVAL_MS) {
            self.auto_submit_interval_ms = value;
        }
        if let Some(value) = parse_env(&lookup, ENV_BATCH_SIZE_LIMIT) {
            self.batch_size_limit = value;
        }
        if let Some(value) = parse_env(&lookup, ENV_IN_FLIGHT_TIMEOUT_MS) {
            self.in_flight_timeout_ms = value;
        }
        if let Some(value) = lookup(ENV_LOG_TIMESTAMPS) {
            self.log_timestamps = value.trim().to_lowercase() != "false";
        }
        self
    }

    #[must_use]
    pub fn auto_submit_interval(&self) -> Duration {
        match self.auto_submit_interval_ms {
            0 => DEFAULT_AUTO_SUBMIT_INTERVAL,
            ms => Duration::from_millis(ms),
        }
    }

    #[must_use]
    pub fn in_flight_timeout(&self) -> Duration {
        match self.in_flight_timeout_ms {
            0 => DEFAULT_IN_FLIGHT_TIMEOUT,
            ms => Duration::from_millis(ms),
        }
    }

    /// Batch size limit actually used, kept strictly below the hard cap.
    #[must_use]
    pub fn effective_batch_size_limit(&self) -> usize {
        self.batch_size_limit.clamp(1, BATCH_HARD_CAP_BYTES - 1)
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ANALYTICS | Ignoring invalid value '{raw}' for {key}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.auto_submit_events);
        assert_eq!(config.auto_submit_interval(), Duration::from_secs(10));
        assert_eq!(config.batch_size_limit, 256_000);
        assert_eq!(config.in_flight_timeout(), Duration::from_secs(60));
        assert!(config.global_attributes.is_empty());
        assert_eq!(config.random_seed, None);
        assert!(config.log_timestamps);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: Config = serde_json::from_str(
            r#"{"auto_submit_events": false, "batch_size_limit": 1000,
                "global_attributes": {"tier": "free"}}"#,
        )
        .unwrap();
        assert!(!config.auto_submit_events);
        assert_eq!(config.batch_size_limit, 1_000);
        assert_eq!(config.global_attributes["tier"], "free");
        assert_eq!(config.auto_submit_interval_ms, 10_000);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().with_env_overrides(lookup(&[
            ("ANALYTICS_AUTO_SUBMIT_EVENTS", "FALSE"),
            ("ANALYTICS_AUTO_SUBMIT_INTERVAL_MS", "2500"),
            ("ANALYTICS_BATCH_SIZE_LIMIT", " 64000 "),
            ("ANALYTICS_IN_FLIGHT_TIMEOUT_MS", "30000"),
            ("ANALYTICS_LOG_TIMESTAMPS", "false"),
        ]));
        assert!(!config.auto_submit_events);
        assert_eq!(config.auto_submit_interval(), Duration::from_millis(2_500));
        assert_eq!(config.batch_size_limit, 64_000);
        assert_eq!(config.in_flight_timeout(), Duration::from_secs(30));
        assert!(!config.log_timestamps);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let config = Config::default().with_env_overrides(lookup(&[
            ("ANALYTICS_AUTO_SUBMIT_INTERVAL_MS", "soon"),
            ("ANALYTICS_BATCH_SIZE_LIMIT", "-1"),
        ]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_zero_intervals_fall_back() {
        let config = Config {
            auto_submit_interval_ms: 0,
            in_flight_timeout_ms: 0,
            ..Config::default()
        };
        assert_eq!(config.auto_submit_interval(), DEFAULT_AUTO_SUBMIT_INTERVAL);
        assert_eq!(config.in_flight_timeout(), DEFAULT_IN_FLIGHT_TIMEOUT);
    }

    #[test]
    fn test_batch_size_limit_clamped_below_hard_cap() {
        let config = Config {
            batch_size_limit: 1_000_000,
            ..Config::default()
        };
        assert_eq!(config.effective_batch_size_limit(), 511_999);

        let config = Config {
            batch_size_limit: 0,
            ..Config::default()
        };
        assert_eq!(config.effective_batch_size_limit(), 1);
    }
}
