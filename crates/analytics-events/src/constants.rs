// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Schema version stamped on every event.
pub const EVENT_VERSION: &str = "v2.0";

/// Maximum number of attributes and metrics combined on a single event.
pub const MAX_ATTRIBUTES_AND_METRICS: usize = 40;

/// Minimum length of an attribute or metric name, in characters.
pub const MIN_NAME_LENGTH: usize = 1;

/// Maximum length of an attribute or metric name, in characters.
pub const MAX_NAME_LENGTH: usize = 50;

/// Maximum length of an attribute value, in characters.
pub const MAX_ATTRIBUTE_VALUE_LENGTH: usize = 200;

/// Absolute ceiling for the serialized size of a batch. A batch must stay
/// strictly below this many bytes to be stored.
pub const BATCH_HARD_CAP_BYTES: usize = 512_000;

/// Default preferred batch size in bytes.
pub const DEFAULT_BATCH_SIZE_LIMIT: usize = 256_000;

pub const DEFAULT_AUTO_SUBMIT_INTERVAL: Duration = Duration::from_secs(10);

/// Submission passes closer together than this are refused.
pub const MIN_SUBMIT_INTERVAL: Duration = Duration::from_millis(1_000);

/// Elapsed time after which a throttled client is certain to try again.
pub const THROTTLE_RAMP: Duration = Duration::from_millis(60_000);

/// Batches dispatched longer ago than this without a response are released
/// from the in-flight set.
pub const DEFAULT_IN_FLIGHT_TIMEOUT: Duration = Duration::from_secs(60);

/// Event type reserved for purchases.
pub const MONETIZATION_EVENT_TYPE: &str = "_monetization.purchase";

pub const ATTRIBUTE_CURRENCY: &str = "_currency";
pub const ATTRIBUTE_PRODUCT_ID: &str = "_product_id";
pub const ATTRIBUTE_ITEM_PRICE_FORMATTED: &str = "_item_price_formatted";
pub const METRIC_QUANTITY: &str = "_quantity";
pub const METRIC_ITEM_PRICE: &str = "_item_price";
