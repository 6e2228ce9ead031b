// SPDX-License-Identifier: GPL-3.0-only

//! Raw buffer pool
//!
//! Owns every sensor buffer for the lifetime of the engine and mediates
//! between the image reader (producer) and the downstream processor
//! (consumer). Buffers live in exactly one place at a time: the *unused*
//! partition, the *ready* partition, or on loan under a [`LockedBuffers`]
//! handle. The total buffer count is constant after initialization.
//!
//! The producer never blocks and never allocates: when the unused partition
//! runs dry it steals the oldest ready buffer, so capture always makes
//! forward progress under consumer back-pressure.

use crate::buffers::container::RawContainer;
use crate::buffers::{RawImageBuffer, SharedRawBuffer};
use crate::descriptor::CameraDescriptor;
use crate::settings::PostProcessSettings;
use crate::types::RawType;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Scoped loan of ready buffers.
///
/// Dropping the handle returns its buffers to the *ready* partition, so a
/// consumer that bails out on an error path cannot leak frames. An empty
/// handle releases nothing.
pub struct LockedBuffers {
    pool: Arc<RawBufferPool>,
    buffers: Vec<SharedRawBuffer>,
}

impl LockedBuffers {
    fn new(pool: Arc<RawBufferPool>, buffers: Vec<SharedRawBuffer>) -> Self {
        Self { pool, buffers }
    }

    pub fn buffers(&self) -> &[SharedRawBuffer] {
        &self.buffers
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Drop for LockedBuffers {
    fn drop(&mut self) {
        self.pool.return_buffers(std::mem::take(&mut self.buffers));
    }
}

/// Fixed-capacity pool of raw frame buffers
pub struct RawBufferPool {
    /// Empty buffers awaiting the producer (FIFO)
    unused: Mutex<VecDeque<SharedRawBuffer>>,
    /// Filled buffers awaiting a consumer, in arrival order
    ready: Mutex<Vec<SharedRawBuffer>>,
    /// First packaged capture, held for immediate in-memory processing
    pending_container: Mutex<Option<RawContainer>>,
    num_buffers: AtomicUsize,
    memory_use_bytes: AtomicUsize,
}

impl RawBufferPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            unused: Mutex::new(VecDeque::new()),
            ready: Mutex::new(Vec::new()),
            pending_container: Mutex::new(None),
            num_buffers: AtomicUsize::new(0),
            memory_use_bytes: AtomicUsize::new(0),
        })
    }

    /// Register a newly allocated buffer. Called only during pool
    /// initialization, before any producer runs.
    pub fn add_buffer(&self, buffer: RawImageBuffer) {
        self.memory_use_bytes
            .fetch_add(buffer.data.len(), Ordering::Relaxed);
        self.num_buffers.fetch_add(1, Ordering::Relaxed);

        self.unused
            .lock()
            .unwrap()
            .push_back(Arc::new(Mutex::new(buffer)));
    }

    /// Drop all buffers. Callers guarantee no session is active.
    pub fn reset(&self) {
        self.unused.lock().unwrap().clear();
        self.ready.lock().unwrap().clear();
        self.pending_container.lock().unwrap().take();

        self.num_buffers.store(0, Ordering::Relaxed);
        self.memory_use_bytes.store(0, Ordering::Relaxed);

        debug!("Buffer pool reset");
    }

    pub fn num_buffers(&self) -> usize {
        self.num_buffers.load(Ordering::Relaxed)
    }

    pub fn memory_use_bytes(&self) -> usize {
        self.memory_use_bytes.load(Ordering::Relaxed)
    }

    /// Producer side: obtain an empty buffer to fill.
    ///
    /// Prefers the unused partition; when that is empty, steals the oldest
    /// ready buffer so the newest frames always win. Returns `None` only
    /// when the pool holds no buffers at all.
    pub fn dequeue_unused(&self) -> Option<SharedRawBuffer> {
        if let Some(buffer) = self.unused.lock().unwrap().pop_front() {
            return Some(buffer);
        }

        let mut ready = self.ready.lock().unwrap();
        if ready.is_empty() {
            None
        } else {
            debug!("Unused partition empty, stealing oldest ready buffer");
            Some(ready.remove(0))
        }
    }

    /// Producer side: publish a filled buffer
    pub fn enqueue_ready(&self, buffer: SharedRawBuffer) {
        self.ready.lock().unwrap().push(buffer);
    }

    /// Return a filled but unwanted buffer to the unused partition
    pub fn discard(&self, buffer: SharedRawBuffer) {
        self.unused.lock().unwrap().push_back(buffer);
    }

    /// Return several filled but unwanted buffers to the unused partition
    pub fn discard_many(&self, buffers: Vec<SharedRawBuffer>) {
        let mut unused = self.unused.lock().unwrap();
        for buffer in buffers {
            unused.push_back(buffer);
        }
    }

    /// Count of ready buffers tagged HDR
    pub fn num_hdr_buffers(&self) -> usize {
        self.ready
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.lock().unwrap().metadata.raw_type == RawType::Hdr)
            .count()
    }

    /// Remove and return the newest ready buffer
    pub fn consume_latest(self: &Arc<Self>) -> LockedBuffers {
        let mut ready = self.ready.lock().unwrap();
        let buffers = match ready.pop() {
            Some(buffer) => vec![buffer],
            None => Vec::new(),
        };

        LockedBuffers::new(Arc::clone(self), buffers)
    }

    /// Remove and return the first ready buffer whose metadata timestamp
    /// equals `timestamp_ns`; empty when none matches.
    pub fn consume_by_timestamp(self: &Arc<Self>, timestamp_ns: i64) -> LockedBuffers {
        let mut ready = self.ready.lock().unwrap();

        let found = ready
            .iter()
            .position(|b| b.lock().unwrap().metadata.timestamp_ns == timestamp_ns);

        let buffers = match found {
            Some(index) => vec![ready.remove(index)],
            None => Vec::new(),
        };

        LockedBuffers::new(Arc::clone(self), buffers)
    }

    /// Drain the entire ready partition
    pub fn consume_all(self: &Arc<Self>) -> LockedBuffers {
        let buffers = std::mem::take(&mut *self.ready.lock().unwrap());
        LockedBuffers::new(Arc::clone(self), buffers)
    }

    /// Return loaned buffers to the ready partition. Called from
    /// [`LockedBuffers::drop`].
    pub fn return_buffers(&self, buffers: Vec<SharedRawBuffer>) {
        if buffers.is_empty() {
            return;
        }

        self.ready.lock().unwrap().extend(buffers);
    }

    /// Atomically move all HDR-tagged ready buffers into a container.
    ///
    /// The first capture stays in memory as the pending container; with a
    /// pending container already present, this set is serialized to
    /// `output_path` instead. The drained buffers return to the unused
    /// partition whether or not serialization succeeds.
    pub fn drain_hdr_to_container(
        &self,
        descriptor: &CameraDescriptor,
        settings: &PostProcessSettings,
        output_path: &Path,
    ) -> io::Result<()> {
        let hdr_buffers: Vec<SharedRawBuffer> = {
            let mut ready = self.ready.lock().unwrap();
            let mut drained = Vec::new();
            let mut index = 0;
            while index < ready.len() {
                if ready[index].lock().unwrap().metadata.raw_type == RawType::Hdr {
                    drained.push(ready.remove(index));
                } else {
                    index += 1;
                }
            }
            drained
        };

        if hdr_buffers.is_empty() {
            warn!("No HDR buffers to drain");
            return Ok(());
        }

        let container =
            RawContainer::from_buffers(descriptor, settings, -1, true, false, &hdr_buffers);

        let result = self.store_or_save(container, output_path);

        self.discard_many(hdr_buffers);

        result
    }

    /// Package the ready buffer at `reference_timestamp` plus up to
    /// `num_extra` closest neighbors by timestamp into a container.
    ///
    /// When no buffer matches the reference timestamp the newest frame is
    /// used instead. All ready buffers are restored to the ready partition
    /// after packaging; the packaging path holds them under a scoped loan.
    pub fn save_snapshot(
        self: &Arc<Self>,
        descriptor: &CameraDescriptor,
        reference_timestamp: i64,
        num_extra: usize,
        write_dng: bool,
        settings: &PostProcessSettings,
        output_path: &Path,
    ) -> io::Result<()> {
        let all = std::mem::take(&mut *self.ready.lock().unwrap());
        if all.is_empty() {
            return Ok(());
        }

        // Restores every buffer to ready on all exit paths below
        let loan = LockedBuffers::new(Arc::clone(self), all);

        let timestamps: Vec<i64> = loan
            .buffers()
            .iter()
            .map(|b| b.lock().unwrap().metadata.timestamp_ns)
            .collect();

        let reference_index = timestamps
            .iter()
            .position(|&ts| ts == reference_timestamp)
            .unwrap_or(timestamps.len() - 1);
        let reference_timestamp = timestamps[reference_index];

        let mut selected = vec![loan.buffers()[reference_index].clone()];

        // Greedily widen around the reference, taking whichever neighbor is
        // closer in time.
        let mut left = reference_index.checked_sub(1);
        let mut right = reference_index + 1;
        let mut remaining = num_extra;

        while remaining > 0 && (left.is_some() || right < timestamps.len()) {
            let left_diff = left
                .map(|i| (timestamps[i] - reference_timestamp).unsigned_abs())
                .unwrap_or(u64::MAX);
            let right_diff = timestamps
                .get(right)
                .map(|&ts| (ts - reference_timestamp).unsigned_abs())
                .unwrap_or(u64::MAX);

            if left_diff < right_diff {
                let i = left.unwrap();
                selected.push(loan.buffers()[i].clone());
                left = i.checked_sub(1);
            } else {
                selected.push(loan.buffers()[right].clone());
                right += 1;
            }

            remaining -= 1;
        }

        let container = RawContainer::from_buffers(
            descriptor,
            settings,
            reference_timestamp,
            false,
            write_dng,
            &selected,
        );

        let result = self.store_or_save(container, output_path);

        drop(loan);

        result
    }

    /// Take the in-memory pending container, if any, for processing
    pub fn take_pending_container(&self) -> Option<RawContainer> {
        self.pending_container.lock().unwrap().take()
    }

    pub fn has_pending_container(&self) -> bool {
        self.pending_container.lock().unwrap().is_some()
    }

    pub fn clear_pending_container(&self) {
        self.pending_container.lock().unwrap().take();
    }

    fn store_or_save(&self, container: RawContainer, output_path: &Path) -> io::Result<()> {
        let mut pending = self.pending_container.lock().unwrap();

        if pending.is_none() {
            info!(
                frames = container.num_frames(),
                "Holding capture container in memory"
            );
            *pending = Some(container);
            Ok(())
        } else {
            info!(
                frames = container.num_frames(),
                path = %output_path.display(),
                "Writing capture container to disk"
            );
            container.save(output_path)
        }
    }
}
