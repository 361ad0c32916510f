// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persisted FIFO of validated events waiting to be batched.

use std::sync::Arc;

use tracing::debug;

use crate::errors::StorageError;
use crate::event::Event;
use crate::storage::{load_slot, store_slot, Slot, Storage};

/// Ordered queue of events, written back to the `EVENTS` slot on every
/// mutation.
///
/// The encoded length of each event is cached alongside it so the size of any
/// prefix, encoded as a JSON array, can be computed without re-serializing.
pub struct EventQueue {
    storage: Arc<dyn Storage>,
    events: Vec<Event>,
    encoded_lens: Vec<usize>,
}

impl EventQueue {
    /// Restores the queue from storage.
    pub fn load(storage: Arc<dyn Storage>) -> Result<Self, StorageError> {
        let events: Vec<Event> = load_slot(storage.as_ref(), Slot::Events)?.unwrap_or_default();
        let encoded_lens = events
            .iter()
            .map(Event::encoded_len)
            .collect::<Result<Vec<_>, _>>()?;
        debug!("ANALYTICS | Restored {} queued events", events.len());
        Ok(EventQueue {
            storage,
            events,
            encoded_lens,
        })
    }

    /// Appends an event at the tail and returns its position. Nothing is
    /// queued when the write fails.
    pub fn append(&mut self, event: Event) -> Result<usize, StorageError> {
        let encoded_len = event.encoded_len()?;
        self.events.push(event);
        if let Err(e) = self.persist(&self.events) {
            self.events.pop();
            return Err(e);
        }
        self.encoded_lens.push(encoded_len);
        Ok(self.events.len() - 1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Encoded size of the first `count` events as a JSON array: brackets,
    /// the events and the commas between them.
    #[must_use]
    pub fn serialized_size(&self, count: usize) -> usize {
        let count = count.min(self.events.len());
        let separators = count.saturating_sub(1);
        2 + separators + self.encoded_lens[..count].iter().sum::<usize>()
    }

    /// Encoded size of the whole queue.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.serialized_size(self.events.len())
    }

    /// Length of the longest prefix whose encoded size fits in `max_bytes`.
    /// Searches downward from the full queue, shrinking the running size one
    /// event at a time.
    #[must_use]
    pub fn prefix_len(&self, max_bytes: usize) -> usize {
        let mut count = self.events.len();
        let mut size = self.total_size();
        while count > 0 && size > max_bytes {
            count -= 1;
            size -= self.encoded_lens[count];
            if count > 0 {
                size -= 1;
            }
        }
        count
    }

    /// Removes and returns the longest prefix that fits in `max_bytes`.
    pub fn drain(&mut self, max_bytes: usize) -> Result<Vec<Event>, StorageError> {
        let count = self.prefix_len(max_bytes);
        self.take_front(count)
    }

    /// Removes and returns the first `count` events.
    pub(crate) fn take_front(&mut self, count: usize) -> Result<Vec<Event>, StorageError> {
        let count = count.min(self.events.len());
        if count == 0 {
            return Ok(Vec::new());
        }
        self.persist(&self.events[count..])?;
        self.encoded_lens.drain(..count);
        Ok(self.events.drain(..count).collect())
    }

    fn persist(&self, events: &[Event]) -> Result<(), StorageError> {
        store_slot(self.storage.as_ref(), Slot::Events, &events)
    }
}
