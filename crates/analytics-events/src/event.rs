// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event and session records as they are queued, persisted and shipped.

use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    ATTRIBUTE_CURRENCY, ATTRIBUTE_ITEM_PRICE_FORMATTED, ATTRIBUTE_PRODUCT_ID, EVENT_VERSION,
    METRIC_ITEM_PRICE, METRIC_QUANTITY, MONETIZATION_EVENT_TYPE,
};

pub type Attributes = HashMap<String, String>;
pub type Metrics = HashMap<String, f64>;

/// Current time truncated to millisecond precision, the resolution events
/// are reported with.
pub(crate) fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// The user session an event belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub start_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_timestamp: Option<DateTime<Utc>>,
    /// Milliseconds between start and stop, present once the session stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl Session {
    pub fn new(id: impl Into<String>, start_timestamp: DateTime<Utc>) -> Self {
        Session {
            id: id.into(),
            start_timestamp,
            stop_timestamp: None,
            duration: None,
        }
    }

    /// Starts a session now.
    pub fn start(id: impl Into<String>) -> Self {
        Self::new(id, now_millis())
    }

    /// Stops the session at `stop_timestamp`, deriving its duration.
    pub fn stop_at(&mut self, stop_timestamp: DateTime<Utc>) {
        self.duration = Some((stop_timestamp - self.start_timestamp).num_milliseconds());
        self.stop_timestamp = Some(stop_timestamp);
    }

    pub fn stop(&mut self) {
        self.stop_at(now_millis());
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_timestamp.is_some()
    }
}

/// A single recorded occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub session: Session,
    pub version: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub metrics: Metrics,
}

impl Event {
    /// Builds an event stamped with the current time and schema version.
    pub fn new(
        event_type: impl Into<String>,
        session: Session,
        attributes: Attributes,
        metrics: Metrics,
    ) -> Self {
        Event {
            event_type: event_type.into(),
            timestamp: now_millis(),
            session,
            version: EVENT_VERSION.to_string(),
            attributes,
            metrics,
        }
    }

    /// Builds a purchase event. The purchase fields are written over any
    /// attribute or metric of the same name.
    pub fn monetization(
        session: Session,
        purchase: Purchase,
        mut attributes: Attributes,
        mut metrics: Metrics,
    ) -> Self {
        attributes.insert(ATTRIBUTE_CURRENCY.to_string(), purchase.currency);
        attributes.insert(ATTRIBUTE_PRODUCT_ID.to_string(), purchase.product_id);
        metrics.insert(METRIC_QUANTITY.to_string(), purchase.quantity);
        match purchase.price {
            Price::Amount(amount) => {
                metrics.insert(METRIC_ITEM_PRICE.to_string(), amount);
            }
            Price::Formatted(formatted) => {
                attributes.insert(ATTRIBUTE_ITEM_PRICE_FORMATTED.to_string(), formatted);
            }
        }
        Self::new(MONETIZATION_EVENT_TYPE, session, attributes, metrics)
    }

    /// Fills in attributes and metrics the event does not already carry.
    pub(crate) fn merge_globals(&mut self, attributes: &Attributes, metrics: &Metrics) {
        for (name, value) in attributes {
            self.attributes
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        for (name, value) in metrics {
            self.metrics.entry(name.clone()).or_insert(*value);
        }
    }

    /// Size in bytes of the event's compact JSON encoding.
    pub fn encoded_len(&self) -> Result<usize, serde_json::Error> {
        serde_json::to_vec(self).map(|bytes| bytes.len())
    }
}

/// Price of a purchased item, either as a number or as a display string
/// (e.g. `"$1.99"`) when the store only provides a localized price.
#[derive(Debug, Clone, PartialEq)]
pub enum Price {
    Amount(f64),
    Formatted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub currency: String,
    pub product_id: String,
    pub quantity: f64,
    pub price: Price,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn session() -> Session {
        Session::new("session-1", Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_session_stop_derives_duration() {
        let mut session = session();
        assert!(!session.is_stopped());
        session.stop_at(session.start_timestamp + Duration::milliseconds(1_500));
        assert!(session.is_stopped());
        assert_eq!(session.duration, Some(1_500));
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = Event::new("level_complete", session(), Attributes::new(), Metrics::new());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "level_complete");
        assert_eq!(value["version"], "v2.0");
        assert_eq!(value["session"]["id"], "session-1");
        assert_eq!(value["session"]["startTimestamp"], "2024-05-01T12:00:00Z");
        assert!(value["session"].get("stopTimestamp").is_none());
        assert!(value["session"].get("duration").is_none());
    }

    #[test]
    fn test_monetization_with_numeric_price() {
        let purchase = Purchase {
            currency: "USD".to_string(),
            product_id: "gold_pack".to_string(),
            quantity: 2.0,
            price: Price::Amount(1.99),
        };
        let mut attributes = Attributes::new();
        attributes.insert("_currency".to_string(), "EUR".to_string());
        attributes.insert("store".to_string(), "play".to_string());

        let event = Event::monetization(session(), purchase, attributes, Metrics::new());

        assert_eq!(event.event_type, MONETIZATION_EVENT_TYPE);
        assert_eq!(event.attributes["_currency"], "USD");
        assert_eq!(event.attributes["_product_id"], "gold_pack");
        assert_eq!(event.attributes["store"], "play");
        assert_eq!(event.metrics["_quantity"], 2.0);
        assert_eq!(event.metrics["_item_price"], 1.99);
        assert!(!event.attributes.contains_key("_item_price_formatted"));
    }

    #[test]
    fn test_monetization_with_formatted_price() {
        let purchase = Purchase {
            currency: "USD".to_string(),
            product_id: "gold_pack".to_string(),
            quantity: 1.0,
            price: Price::Formatted("$1.99".to_string()),
        };
        let event = Event::monetization(session(), purchase, Attributes::new(), Metrics::new());

        assert_eq!(event.attributes["_item_price_formatted"], "$1.99");
        assert!(!event.metrics.contains_key("_item_price"));
    }

    #[test]
    fn test_merge_globals_keeps_event_values() {
        let mut attributes = Attributes::new();
        attributes.insert("screen".to_string(), "home".to_string());
        let mut event = Event::new("view", session(), attributes, Metrics::new());

        let mut global_attributes = Attributes::new();
        global_attributes.insert("screen".to_string(), "global".to_string());
        global_attributes.insert("tier".to_string(), "premium".to_string());
        let mut global_metrics = Metrics::new();
        global_metrics.insert("level".to_string(), 3.0);

        event.merge_globals(&global_attributes, &global_metrics);

        assert_eq!(event.attributes["screen"], "home");
        assert_eq!(event.attributes["tier"], "premium");
        assert_eq!(event.metrics["level"], 3.0);
    }

    #[test]
    fn test_encoded_len_matches_json() {
        let event = Event::new("a", session(), Attributes::new(), Metrics::new());
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(event.encoded_len().unwrap(), json.len());
    }
}
