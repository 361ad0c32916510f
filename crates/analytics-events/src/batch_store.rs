// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persisted batches and the index giving their submission order.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::StorageError;
use crate::event::Event;
use crate::storage::{load_slot, store_slot, Slot, Storage};

/// A group of events submitted together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    pub id: String,
    pub events: Vec<Event>,
}

/// Batches keyed by id (`BATCHES` slot) plus their submission order, oldest
/// first (`BATCH_INDEX` slot). Both slots are rewritten after every change.
pub struct BatchStore {
    storage: Arc<dyn Storage>,
    batches: HashMap<String, Vec<Event>>,
    index: Vec<String>,
}

impl BatchStore {
    /// Restores the store from storage, repairing any disagreement between the
    /// two slots: index entries without a batch are dropped and batches missing
    /// from the index are appended to it.
    pub fn load(storage: Arc<dyn Storage>) -> Result<Self, StorageError> {
        let batches: HashMap<String, Vec<Event>> =
            load_slot(storage.as_ref(), Slot::Batches)?.unwrap_or_default();
        let stored_index: Vec<String> =
            load_slot(storage.as_ref(), Slot::BatchIndex)?.unwrap_or_default();

        let mut index = Vec::with_capacity(batches.len());
        for id in stored_index {
            if batches.contains_key(&id) && !index.contains(&id) {
                index.push(id);
            }
        }
        let mut orphans: Vec<String> = batches
            .keys()
            .filter(|id| !index.contains(id))
            .cloned()
            .collect();
        orphans.sort();

        let mut store = BatchStore {
            storage,
            batches,
            index,
        };
        if !orphans.is_empty() {
            warn!(
                "ANALYTICS | {} stored batches were missing from the batch index",
                orphans.len()
            );
            store.index.extend(orphans);
            store.persist_index()?;
        }
        debug!("ANALYTICS | Restored {} pending batches", store.index.len());
        Ok(store)
    }

    /// Registers a new batch under a fresh id and returns the id.
    ///
    /// The batches slot is written before the index, so a failure in between
    /// leaves at worst an unindexed batch, which [`BatchStore::load`] adopts.
    /// The store is unchanged when an error is returned.
    pub fn insert(&mut self, events: Vec<Event>) -> Result<String, StorageError> {
        let id = Uuid::new_v4().to_string();
        self.batches.insert(id.clone(), events);
        if let Err(e) = self.persist_batches() {
            self.batches.remove(&id);
            return Err(e);
        }

        let mut index = self.index.clone();
        index.push(id.clone());
        if let Err(e) = store_slot(self.storage.as_ref(), Slot::BatchIndex, &index) {
            self.batches.remove(&id);
            self.restore_batches_slot();
            return Err(e);
        }
        self.index = index;
        Ok(id)
    }

    /// Removes a batch. Returns whether it was present.
    ///
    /// The index is written before the batches slot, so a failure in between
    /// leaves at worst an indexed id without a batch, which
    /// [`BatchStore::load`] drops. The store is unchanged when an error is
    /// returned.
    pub fn remove(&mut self, id: &str) -> Result<bool, StorageError> {
        let index: Vec<String> = self
            .index
            .iter()
            .filter(|existing| *existing != id)
            .cloned()
            .collect();
        if !self.batches.contains_key(id) && index.len() == self.index.len() {
            return Ok(false);
        }

        store_slot(self.storage.as_ref(), Slot::BatchIndex, &index)?;
        let removed = self.batches.remove(id);
        if let Err(e) = self.persist_batches() {
            if let Some(events) = removed {
                self.batches.insert(id.to_string(), events);
            }
            if let Err(restore) = self.persist_index() {
                warn!("ANALYTICS | Batch index left without batch {id}: {restore}");
            }
            return Err(e);
        }
        self.index = index;
        Ok(true)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&[Event]> {
        self.batches.get(id).map(Vec::as_slice)
    }

    /// Pending batches in submission order.
    #[must_use]
    pub fn batches(&self) -> Vec<Batch> {
        self.index
            .iter()
            .filter_map(|id| {
                self.batches.get(id).map(|events| Batch {
                    id: id.clone(),
                    events: events.clone(),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.batches.contains_key(id)
    }

    /// Batch ids in submission order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.index
    }

    #[must_use]
    pub fn oldest(&self) -> Option<&str> {
        self.index.first().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn persist_batches(&self) -> Result<(), StorageError> {
        store_slot(self.storage.as_ref(), Slot::Batches, &self.batches)
    }

    fn restore_batches_slot(&self) {
        if let Err(e) = self.persist_batches() {
            warn!("ANALYTICS | Stored batches left out of sync with the index: {e}");
        }
    }

    fn persist_index(&self) -> Result<(), StorageError> {
        store_slot(self.storage.as_ref(), Slot::BatchIndex, &self.index)
    }
}
