// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Submission state machine.
//!
//! [`SubmissionEngine`] owns every piece of mutable submission state: the event
//! queue, the batch store, the in-flight set and the throttle flag. It never
//! performs I/O beyond the storage port and never waits. Submission passes
//! return the [`Dispatch`]es to hand to the transport, and responses are fed
//! back through [`SubmissionEngine::handle_response`], which returns what the
//! caller must do next. [`crate::service`] drives it from a single task.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::batch_store::{Batch, BatchStore};
use crate::batcher::generate_batches;
use crate::config::Config;
use crate::constants::{MAX_ATTRIBUTE_VALUE_LENGTH, MIN_SUBMIT_INTERVAL};
use crate::context::{ClientContext, SubmitPayload};
use crate::errors::{ErrorCode, StorageError, SubmitError};
use crate::event::{Attributes, Event, Metrics};
use crate::queue::EventQueue;
use crate::storage::{load_slot, store_slot, Slot, Storage};
use crate::throttle::ThrottleGate;
use crate::transport::IngestResponse;
use crate::validator::{valid_name, validate};

pub type SubmitResult = Result<IngestResponse, SubmitError>;

/// Invoked once per dispatched batch with its id and the delivery result.
pub type SubmitCallback = Arc<dyn Fn(&str, &SubmitResult) + Send + Sync>;

/// Settings that cannot come from [`Config`].
#[derive(Clone, Default)]
pub struct EngineOptions {
    /// Context sent with batches when a submission does not provide one.
    pub client_context: ClientContext,
    /// Callback used when a submission does not provide one.
    pub submit_callback: Option<SubmitCallback>,
}

/// Per-call overrides for a submission pass.
#[derive(Clone, Default)]
pub struct SubmitOptions {
    pub client_context: Option<ClientContext>,
    pub submit_callback: Option<SubmitCallback>,
}

/// A batch to hand to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub batch_id: String,
    /// Sequence number of this dispatch. The response must carry it back so
    /// an answer to an earlier, released dispatch of the same batch is not
    /// mistaken for the current one.
    pub dispatch_id: u64,
    pub payload: SubmitPayload,
}

/// Why a submission pass did not run.
#[derive(Debug, Clone, PartialEq)]
pub enum GateRefusal {
    Throttled,
    InFlight(usize),
    Empty,
    TooSoon(Duration),
}

impl fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRefusal::Throttled => write!(f, "client is throttled"),
            GateRefusal::InFlight(count) => write!(f, "{count} batch(es) still in flight"),
            GateRefusal::Empty => write!(f, "nothing to submit"),
            GateRefusal::TooSoon(elapsed) => write!(
                f,
                "last submission was {}ms ago",
                elapsed.as_millis()
            ),
        }
    }
}

/// Follow-up work produced by a response.
pub struct ResponseOutcome {
    pub batch_id: String,
    /// Whether the batch was removed from the store.
    pub cleared: bool,
    /// Callback registered when the batch was dispatched.
    pub callback: Option<SubmitCallback>,
    /// Batches released by a throttle-clear flush.
    pub flush: Vec<Dispatch>,
}

impl fmt::Debug for ResponseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseOutcome")
            .field("batch_id", &self.batch_id)
            .field("cleared", &self.cleared)
            .field("callback", &self.callback.is_some())
            .field("flush", &self.flush)
            .finish()
    }
}

/// Point-in-time copy of the engine state.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub events: Vec<Event>,
    pub batches: Vec<Batch>,
    pub in_flight: Vec<String>,
    pub is_throttled: bool,
    pub global_attributes: Attributes,
    pub global_metrics: Metrics,
}

impl EngineSnapshot {
    #[must_use]
    pub fn batch_ids(&self) -> Vec<String> {
        self.batches.iter().map(|batch| batch.id.clone()).collect()
    }
}

struct InFlight {
    dispatch_id: u64,
    dispatched_at: Instant,
    context: ClientContext,
    callback: Option<SubmitCallback>,
}

pub struct SubmissionEngine {
    config: Config,
    storage: Arc<dyn Storage>,
    queue: EventQueue,
    store: BatchStore,
    in_flight: HashMap<String, InFlight>,
    next_dispatch_id: u64,
    is_throttled: bool,
    last_submit: Option<Instant>,
    throttle_gate: ThrottleGate,
    global_attributes: Attributes,
    global_metrics: Metrics,
    options: EngineOptions,
}

impl SubmissionEngine {
    /// Rebuilds the engine from storage. Batches persisted by a previous
    /// process are pending again; nothing starts in flight.
    pub fn new(
        config: Config,
        options: EngineOptions,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, StorageError> {
        storage.reload()?;
        let queue = EventQueue::load(Arc::clone(&storage))?;
        let store = BatchStore::load(Arc::clone(&storage))?;

        let mut global_attributes = config.global_attributes.clone();
        global_attributes.extend(
            load_slot::<Attributes>(storage.as_ref(), Slot::GlobalAttributes)?.unwrap_or_default(),
        );
        let mut global_metrics = config.global_metrics.clone();
        global_metrics.extend(
            load_slot::<Metrics>(storage.as_ref(), Slot::GlobalMetrics)?.unwrap_or_default(),
        );

        Ok(SubmissionEngine {
            throttle_gate: ThrottleGate::new(config.random_seed),
            config,
            storage,
            queue,
            store,
            in_flight: HashMap::new(),
            next_dispatch_id: 0,
            is_throttled: false,
            last_submit: None,
            global_attributes,
            global_metrics,
            options,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.is_throttled
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Merges global attributes and metrics into `event`, validates it and
    /// appends it to the queue. Invalid events are logged and dropped.
    pub fn record_event(&mut self, mut event: Event) -> Result<Option<Event>, StorageError> {
        event.merge_globals(&self.global_attributes, &self.global_metrics);
        if let Err(e) = validate(&event) {
            error!(
                "ANALYTICS | Dropping invalid '{}' event: {}",
                event.event_type, e
            );
            return Ok(None);
        }
        let position = self.queue.append(event.clone())?;
        debug!(
            "ANALYTICS | Queued '{}' event at position {}",
            event.event_type, position
        );
        Ok(Some(event))
    }

    /// Whether the queue has grown enough to submit without waiting for the
    /// timer.
    #[must_use]
    pub fn queue_reached_batch_size(&self) -> bool {
        self.config.auto_submit_events
            && !self.queue.is_empty()
            && self.queue.total_size() >= self.config.effective_batch_size_limit()
    }

    /// Runs one submission pass: evaluates the gate, cuts pending events into
    /// batches and dispatches either the oldest batch (while throttled) or
    /// every batch not already in flight.
    pub fn submit_events(
        &mut self,
        now: Instant,
        options: SubmitOptions,
    ) -> Result<Vec<Dispatch>, StorageError> {
        if let Err(refusal) = self.evaluate_gate(now) {
            warn!("ANALYTICS | Skipping submission: {refusal}");
            return Ok(Vec::new());
        }

        generate_batches(
            &mut self.queue,
            &mut self.store,
            self.config.effective_batch_size_limit(),
        )?;
        self.last_submit = Some(now);

        let context = options
            .client_context
            .unwrap_or_else(|| self.options.client_context.clone());
        let callback = options
            .submit_callback
            .or_else(|| self.options.submit_callback.clone());

        if self.is_throttled {
            let Some(oldest) = self.store.oldest().map(str::to_string) else {
                return Ok(Vec::new());
            };
            debug!("ANALYTICS | Throttled, retrying oldest batch {oldest} alone");
            return Ok(self
                .submit_batch_by_id(&oldest, now, context, callback)
                .into_iter()
                .collect());
        }

        Ok(self.submit_all_batches(now, context, callback))
    }

    /// Checks whether a submission pass may run now. Batches in flight for
    /// longer than the configured timeout are released first.
    pub fn evaluate_gate(&mut self, now: Instant) -> Result<(), GateRefusal> {
        self.release_stale_in_flight(now);

        let since_last_submit = self
            .last_submit
            .map(|last| now.saturating_duration_since(last));

        if self.is_throttled && !self.throttle_gate.allows(since_last_submit) {
            return Err(GateRefusal::Throttled);
        }
        if !self.in_flight.is_empty() {
            return Err(GateRefusal::InFlight(self.in_flight.len()));
        }
        if self.queue.is_empty() && self.store.is_empty() {
            return Err(GateRefusal::Empty);
        }
        if let Some(elapsed) = since_last_submit {
            if elapsed < MIN_SUBMIT_INTERVAL {
                return Err(GateRefusal::TooSoon(elapsed));
            }
        }
        Ok(())
    }

    /// Marks a stored batch in flight and builds its payload. Unknown or empty
    /// ids yield nothing.
    pub fn submit_batch_by_id(
        &mut self,
        batch_id: &str,
        now: Instant,
        context: ClientContext,
        callback: Option<SubmitCallback>,
    ) -> Option<Dispatch> {
        if batch_id.is_empty() {
            warn!("ANALYTICS | Refusing to submit a batch without an id");
            return None;
        }
        let Some(events) = self.store.get(batch_id) else {
            warn!("ANALYTICS | Refusing to submit unknown batch {batch_id}");
            return None;
        };

        let payload = SubmitPayload {
            events: events.to_vec(),
            context: context.clone(),
        };
        self.next_dispatch_id += 1;
        let dispatch_id = self.next_dispatch_id;
        self.in_flight.insert(
            batch_id.to_string(),
            InFlight {
                dispatch_id,
                dispatched_at: now,
                context,
                callback,
            },
        );
        debug!(
            "ANALYTICS | Dispatching batch {batch_id} with {} event(s)",
            payload.events.len()
        );
        Some(Dispatch {
            batch_id: batch_id.to_string(),
            dispatch_id,
            payload,
        })
    }

    /// Dispatches every stored batch not already in flight, in index order.
    pub fn submit_all_batches(
        &mut self,
        now: Instant,
        context: ClientContext,
        callback: Option<SubmitCallback>,
    ) -> Vec<Dispatch> {
        let pending: Vec<String> = self
            .store
            .ids()
            .iter()
            .filter(|id| !self.in_flight.contains_key(*id))
            .cloned()
            .collect();
        pending
            .iter()
            .filter_map(|id| self.submit_batch_by_id(id, now, context.clone(), callback.clone()))
            .collect()
    }

    /// Applies the endpoint's answer for one batch.
    ///
    /// Success clears the batch and the throttle flag. A failure without a
    /// status or with status 400 clears the batch when its code can never
    /// succeed, and otherwise keeps it and sets the throttle flag to whether the
    /// code is `Throttling`. Any other failure keeps the batch and leaves the
    /// flag alone. When the flag goes from set to unset every pending batch is
    /// dispatched again right away.
    ///
    /// Only the response to the current dispatch of a batch releases its
    /// in-flight record. A late answer to a dispatch that timed out and was
    /// sent again is still applied to the store, but the newer dispatch stays
    /// in flight and keeps its callback.
    pub fn handle_response(
        &mut self,
        batch_id: &str,
        dispatch_id: u64,
        result: &SubmitResult,
        now: Instant,
    ) -> Result<ResponseOutcome, StorageError> {
        let was_throttled = self.is_throttled;
        let record = match self.in_flight.get(batch_id).map(|record| record.dispatch_id) {
            Some(current) if current == dispatch_id => self.in_flight.remove(batch_id),
            Some(current) => {
                debug!(
                    "ANALYTICS | Response to dispatch {dispatch_id} of batch {batch_id} \
                     superseded by dispatch {current}"
                );
                None
            }
            None => None,
        };

        let cleared = match result {
            Ok(response) => {
                debug!(
                    "ANALYTICS | Batch {batch_id} delivered with status {}",
                    response.status
                );
                self.is_throttled = false;
                self.store.remove(batch_id)?
            }
            Err(e) if e.status.is_none() || e.status == Some(400) => {
                if e.code.is_non_retryable() {
                    error!("ANALYTICS | Discarding batch {batch_id}, rejected as invalid: {e}");
                    self.store.remove(batch_id)?
                } else {
                    self.is_throttled = e.code == ErrorCode::Throttling;
                    warn!("ANALYTICS | Keeping batch {batch_id} for retry: {e}");
                    false
                }
            }
            Err(e) => {
                warn!("ANALYTICS | Keeping batch {batch_id} for retry: {e}");
                false
            }
        };

        let (context, callback) = match record {
            Some(record) => (record.context, record.callback),
            None => {
                debug!("ANALYTICS | Response for batch {batch_id} without a matching dispatch");
                (
                    self.options.client_context.clone(),
                    self.options.submit_callback.clone(),
                )
            }
        };

        let flush = if was_throttled && !self.is_throttled {
            debug!("ANALYTICS | Throttling lifted, flushing pending batches");
            self.submit_all_batches(now, context, callback.clone())
        } else {
            Vec::new()
        };

        Ok(ResponseOutcome {
            batch_id: batch_id.to_string(),
            cleared,
            callback,
            flush,
        })
    }

    pub fn set_global_attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<bool, StorageError> {
        let name = name.into();
        let value = value.into();
        if !valid_name(&name) || value.chars().count() > MAX_ATTRIBUTE_VALUE_LENGTH {
            error!("ANALYTICS | Ignoring invalid global attribute '{name}'");
            return Ok(false);
        }
        let mut attributes = self.global_attributes.clone();
        attributes.insert(name, value);
        store_slot(self.storage.as_ref(), Slot::GlobalAttributes, &attributes)?;
        self.global_attributes = attributes;
        Ok(true)
    }

    pub fn remove_global_attribute(&mut self, name: &str) -> Result<bool, StorageError> {
        let mut attributes = self.global_attributes.clone();
        if attributes.remove(name).is_none() {
            return Ok(false);
        }
        store_slot(self.storage.as_ref(), Slot::GlobalAttributes, &attributes)?;
        self.global_attributes = attributes;
        Ok(true)
    }

    pub fn set_global_metric(
        &mut self,
        name: impl Into<String>,
        value: f64,
    ) -> Result<bool, StorageError> {
        let name = name.into();
        if !valid_name(&name) || !value.is_finite() {
            error!("ANALYTICS | Ignoring invalid global metric '{name}'");
            return Ok(false);
        }
        let mut metrics = self.global_metrics.clone();
        metrics.insert(name, value);
        store_slot(self.storage.as_ref(), Slot::GlobalMetrics, &metrics)?;
        self.global_metrics = metrics;
        Ok(true)
    }

    pub fn remove_global_metric(&mut self, name: &str) -> Result<bool, StorageError> {
        let mut metrics = self.global_metrics.clone();
        if metrics.remove(name).is_none() {
            return Ok(false);
        }
        store_slot(self.storage.as_ref(), Slot::GlobalMetrics, &metrics)?;
        self.global_metrics = metrics;
        Ok(true)
    }

    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        let mut in_flight: Vec<String> = self.in_flight.keys().cloned().collect();
        in_flight.sort();
        EngineSnapshot {
            events: self.queue.events().to_vec(),
            batches: self.store.batches(),
            in_flight,
            is_throttled: self.is_throttled,
            global_attributes: self.global_attributes.clone(),
            global_metrics: self.global_metrics.clone(),
        }
    }

    fn release_stale_in_flight(&mut self, now: Instant) {
        let timeout = self.config.in_flight_timeout();
        self.in_flight.retain(|batch_id, record| {
            let stale = now.saturating_duration_since(record.dispatched_at) >= timeout;
            if stale {
                warn!(
                    "ANALYTICS | No response for batch {batch_id} after {}ms, releasing it",
                    timeout.as_millis()
                );
            }
            !stale
        });
    }
}
