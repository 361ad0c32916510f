// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cuts the event queue into size-bounded batches.

use tracing::{debug, error};

use crate::batch_store::BatchStore;
use crate::constants::BATCH_HARD_CAP_BYTES;
use crate::errors::StorageError;
use crate::queue::EventQueue;

/// Moves every queued event into one or more batches and returns the ids of
/// the batches created, oldest first.
///
/// Each batch takes the longest prefix of the queue that fits in
/// `batch_size_limit`. A single event larger than the limit still gets a batch
/// of its own, unless it reaches [`BATCH_HARD_CAP_BYTES`], in which case it is
/// dropped.
pub fn generate_batches(
    queue: &mut EventQueue,
    store: &mut BatchStore,
    batch_size_limit: usize,
) -> Result<Vec<String>, StorageError> {
    let mut created = Vec::new();

    while !queue.is_empty() {
        let count = queue.prefix_len(batch_size_limit).max(1);
        let size = queue.serialized_size(count);

        if size >= BATCH_HARD_CAP_BYTES {
            error!(
                "ANALYTICS | Dropping {} event(s) of {} bytes: exceeds the {} byte batch cap",
                count, size, BATCH_HARD_CAP_BYTES
            );
            queue.take_front(count)?;
            continue;
        }

        // The batch is stored before the queue shrinks: a crash in between
        // resends events rather than losing them.
        let id = store.insert(queue.events()[..count].to_vec())?;
        if let Err(e) = queue.take_front(count) {
            if let Err(undo) = store.remove(&id) {
                error!("ANALYTICS | Batch {id} duplicates queued events: {undo}");
            }
            return Err(e);
        }
        debug!("ANALYTICS | Created batch {id} with {count} event(s), {size} bytes");
        created.push(id);
    }

    Ok(created)
}
