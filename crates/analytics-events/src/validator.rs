// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Schema checks applied to every event before it is queued.

use crate::constants::{
    EVENT_VERSION, MAX_ATTRIBUTES_AND_METRICS, MAX_ATTRIBUTE_VALUE_LENGTH, MAX_NAME_LENGTH,
    MIN_NAME_LENGTH,
};
use crate::errors::ValidationError;
use crate::event::Event;

pub(crate) fn valid_name(name: &str) -> bool {
    (MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&name.chars().count())
}

/// Validates an event against the schema limits.
///
/// Checks run in a fixed order and stop at the first failure:
/// version, metric values, entry count, attribute names, metric names,
/// attribute values. Any string is an acceptable event type, including the
/// empty one. Lengths are counted in characters.
pub fn validate(event: &Event) -> Result<(), ValidationError> {
    if event.version != EVENT_VERSION {
        return Err(ValidationError::Version(event.version.clone()));
    }

    if let Some((name, _)) = event.metrics.iter().find(|(_, value)| !value.is_finite()) {
        return Err(ValidationError::MetricValue(name.clone()));
    }

    let entries = event.attributes.len() + event.metrics.len();
    if entries > MAX_ATTRIBUTES_AND_METRICS {
        return Err(ValidationError::TooManyEntries(entries));
    }

    if let Some(name) = event.attributes.keys().find(|name| !valid_name(name)) {
        return Err(ValidationError::AttributeName(name.clone()));
    }

    if let Some(name) = event.metrics.keys().find(|name| !valid_name(name)) {
        return Err(ValidationError::MetricName(name.clone()));
    }

    if let Some((name, value)) = event
        .attributes
        .iter()
        .find(|(_, value)| value.chars().count() > MAX_ATTRIBUTE_VALUE_LENGTH)
    {
        return Err(ValidationError::AttributeValue {
            name: name.clone(),
            length: value.chars().count(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Attributes, Metrics, Session};

    fn event_with(attributes: Attributes, metrics: Metrics) -> Event {
        Event::new("test", Session::start("s"), attributes, metrics)
    }

    fn attributes(count: usize) -> Attributes {
        (0..count)
            .map(|i| (format!("attr{i}"), "value".to_string()))
            .collect()
    }

    fn metrics(count: usize) -> Metrics {
        (0..count).map(|i| (format!("metric{i}"), i as f64)).collect()
    }

    #[test]
    fn test_valid_event() {
        assert_eq!(validate(&event_with(attributes(3), metrics(3))), Ok(()));
    }

    #[test]
    fn test_entry_limit_boundary() {
        assert_eq!(validate(&event_with(attributes(20), metrics(20))), Ok(()));
        assert_eq!(
            validate(&event_with(attributes(21), metrics(20))),
            Err(ValidationError::TooManyEntries(41))
        );
        assert_eq!(
            validate(&event_with(attributes(0), metrics(41))),
            Err(ValidationError::TooManyEntries(41))
        );
    }

    #[test]
    fn test_attribute_value_boundary() {
        let mut ok = Attributes::new();
        ok.insert("name".to_string(), "x".repeat(200));
        assert_eq!(validate(&event_with(ok, Metrics::new())), Ok(()));

        let mut too_long = Attributes::new();
        too_long.insert("name".to_string(), "x".repeat(201));
        assert_eq!(
            validate(&event_with(too_long, Metrics::new())),
            Err(ValidationError::AttributeValue {
                name: "name".to_string(),
                length: 201
            })
        );
    }

    #[test]
    fn test_attribute_value_counts_characters() {
        let mut multibyte = Attributes::new();
        multibyte.insert("name".to_string(), "é".repeat(200));
        assert_eq!(validate(&event_with(multibyte, Metrics::new())), Ok(()));
    }

    #[test]
    fn test_name_length_boundaries() {
        let mut ok = Attributes::new();
        ok.insert("a".repeat(50), "v".to_string());
        assert_eq!(validate(&event_with(ok, Metrics::new())), Ok(()));

        let mut long_attribute = Attributes::new();
        long_attribute.insert("a".repeat(51), "v".to_string());
        assert_eq!(
            validate(&event_with(long_attribute, Metrics::new())),
            Err(ValidationError::AttributeName("a".repeat(51)))
        );

        let mut empty_attribute = Attributes::new();
        empty_attribute.insert(String::new(), "v".to_string());
        assert_eq!(
            validate(&event_with(empty_attribute, Metrics::new())),
            Err(ValidationError::AttributeName(String::new()))
        );

        let mut long_metric = Metrics::new();
        long_metric.insert("m".repeat(51), 1.0);
        assert_eq!(
            validate(&event_with(Attributes::new(), long_metric)),
            Err(ValidationError::MetricName("m".repeat(51)))
        );
    }

    #[test]
    fn test_non_finite_metric_rejected() {
        let mut nan = Metrics::new();
        nan.insert("score".to_string(), f64::NAN);
        assert_eq!(
            validate(&event_with(Attributes::new(), nan)),
            Err(ValidationError::MetricValue("score".to_string()))
        );

        let mut infinite = Metrics::new();
        infinite.insert("score".to_string(), f64::INFINITY);
        assert!(validate(&event_with(Attributes::new(), infinite)).is_err());
    }

    #[test]
    fn test_version_and_event_type() {
        let mut event = event_with(Attributes::new(), Metrics::new());
        event.version = "v1.0".to_string();
        assert_eq!(
            validate(&event),
            Err(ValidationError::Version("v1.0".to_string()))
        );

        let mut event = event_with(Attributes::new(), Metrics::new());
        event.event_type = String::new();
        assert_eq!(validate(&event), Ok(()));
    }

    #[test]
    fn test_checks_short_circuit_in_order() {
        // Too many entries and an over-long value: the count check runs first.
        let mut attrs = attributes(41);
        attrs.insert("long".to_string(), "x".repeat(300));
        assert_eq!(
            validate(&event_with(attrs, Metrics::new())),
            Err(ValidationError::TooManyEntries(42))
        );
    }
}
