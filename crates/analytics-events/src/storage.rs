// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persistence port for queued events and batches.
//!
//! State is kept in a handful of named slots, each holding one JSON value that
//! is replaced wholesale on every write. [`MemoryStorage`] keeps slots in the
//! process; [`SledStorage`] writes them through to an embedded sled database so
//! pending work survives restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sled::{Config as SledConfig, Db};
use tracing::{debug, error};

use crate::errors::StorageError;

/// Names of the persisted slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Events,
    Batches,
    BatchIndex,
    GlobalAttributes,
    GlobalMetrics,
}

impl Slot {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Slot::Events => "EVENTS",
            Slot::Batches => "BATCHES",
            Slot::BatchIndex => "BATCH_INDEX",
            Slot::GlobalAttributes => "GLOBAL_ATTRIBUTES",
            Slot::GlobalMetrics => "GLOBAL_METRICS",
        }
    }
}

/// Synchronous key/value persistence keyed by slot name.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    /// Re-reads the backing store, discarding anything cached in memory.
    fn reload(&self) -> Result<(), StorageError>;
}

/// Reads a typed slot. A slot holding data that no longer deserializes is
/// reported and treated as empty so a corrupt record cannot wedge startup.
pub fn load_slot<T: DeserializeOwned>(
    storage: &dyn Storage,
    slot: Slot,
) -> Result<Option<T>, StorageError> {
    let Some(value) = storage.get(slot.key())? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            error!("ANALYTICS | Discarding unreadable {} slot: {}", slot.key(), e);
            Ok(None)
        }
    }
}

/// Replaces a typed slot.
pub fn store_slot<T: Serialize>(
    storage: &dyn Storage,
    slot: Slot,
    value: &T,
) -> Result<(), StorageError> {
    storage.set(slot.key(), serde_json::to_value(value)?)
}

/// Process-local storage, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let slots = self.slots.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().map_err(|_| StorageError::Poisoned)?;
        slots.insert(key.to_string(), value);
        Ok(())
    }

    fn reload(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Sled-backed storage. Reads are served from a cache filled by
/// [`Storage::reload`]; writes go to the cache and are flushed to disk before
/// returning.
#[derive(Debug)]
pub struct SledStorage {
    db: Db,
    path: PathBuf,
    cache: Mutex<HashMap<String, Value>>,
}

impl SledStorage {
    /// Opens (or creates) a store at `path` and loads its slots.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let db = SledConfig::new().path(&path).open()?;
        let storage = SledStorage {
            db,
            path,
            cache: Mutex::new(HashMap::new()),
        };
        storage.reload()?;
        Ok(storage)
    }

    /// Opens an in-memory store (ephemeral across restarts).
    pub fn open_ephemeral() -> Result<Self, StorageError> {
        let db = SledConfig::new().temporary(true).open()?;
        Ok(SledStorage {
            db,
            path: PathBuf::new(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the filesystem path backing the store. Ephemeral stores return
    /// an empty path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for SledStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let cache = self.cache.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(cache.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&value)?;
        self.db.insert(key.as_bytes(), bytes)?;
        self.db.flush()?;
        let mut cache = self.cache.lock().map_err(|_| StorageError::Poisoned)?;
        cache.insert(key.to_string(), value);
        Ok(())
    }

    fn reload(&self) -> Result<(), StorageError> {
        let mut loaded = HashMap::new();
        for entry in self.db.iter() {
            let (key, bytes) = entry?;
            let key = String::from_utf8_lossy(&key).to_string();
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => {
                    loaded.insert(key, value);
                }
                Err(e) => error!("ANALYTICS | Skipping unreadable record {}: {}", key, e),
            }
        }
        debug!("ANALYTICS | Loaded {} storage slots", loaded.len());
        let mut cache = self.cache.lock().map_err(|_| StorageError::Poisoned)?;
        *cache = loaded;
        Ok(())
    }
}
