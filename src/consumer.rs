// SPDX-License-Identifier: GPL-3.0-only

//! Raw image consumer
//!
//! Bridges the adapter's image reader to the buffer pool. Pixel data and
//! capture metadata arrive on different adapter threads and are only
//! correlated by sensor timestamp, so the consumer holds whichever half
//! shows up first and publishes a pool buffer once both halves are in.
//!
//! The worker owns all matching state; callers only enqueue.

use crate::adapter::{AcquiredImage, CaptureMetadata, OutputConfiguration};
use crate::buffers::pool::RawBufferPool;
use crate::buffers::{RawFrameMetadata, RawImageBuffer};
use crate::constants::consumer::MAX_PENDING_MATCHES;
use crate::constants::EVENT_LOOP_POLL_INTERVAL;
use crate::types::{RawType, ScreenOrientation};
use std::collections::VecDeque;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

enum WorkItem {
    Image(AcquiredImage),
    Metadata(RawFrameMetadata),
}

struct Worker {
    sender: Sender<WorkItem>,
    handle: JoinHandle<()>,
}

/// Consumes reader images and completed-capture metadata, publishing
/// matched frames into the buffer pool.
pub struct RawImageConsumer {
    pool: Arc<RawBufferPool>,
    output: OutputConfiguration,
    buffer_count: usize,
    worker: Mutex<Option<Worker>>,
}

impl RawImageConsumer {
    pub fn new(pool: Arc<RawBufferPool>, output: OutputConfiguration, buffer_count: usize) -> Self {
        Self {
            pool,
            output,
            buffer_count,
            worker: Mutex::new(None),
        }
    }

    /// Construct with the default pool depth
    pub fn with_defaults(pool: Arc<RawBufferPool>, output: OutputConfiguration) -> Self {
        Self::new(pool, output, crate::constants::consumer::DEFAULT_POOL_BUFFERS)
    }

    /// Allocate pool buffers (first start only) and spawn the matcher
    /// worker. Idempotent while running.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            warn!("Image consumer already running");
            return;
        }

        if self.pool.num_buffers() == 0 {
            for _ in 0..self.buffer_count {
                self.pool.add_buffer(RawImageBuffer::host_allocated(
                    self.output.width,
                    self.output.height,
                    self.output.format,
                ));
            }
            info!(
                buffers = self.buffer_count,
                bytes = self.pool.memory_use_bytes(),
                "Allocated raw buffer pool"
            );
        }

        let (sender, receiver) = mpsc::channel::<WorkItem>();
        let pool = Arc::clone(&self.pool);

        let handle = std::thread::spawn(move || {
            debug!("Image consumer worker started");

            let mut pending_images: VecDeque<AcquiredImage> = VecDeque::new();
            let mut pending_metadata: VecDeque<RawFrameMetadata> = VecDeque::new();

            loop {
                match receiver.recv_timeout(EVENT_LOOP_POLL_INTERVAL) {
                    Ok(WorkItem::Image(image)) => {
                        pending_images.push_back(image);
                        match_pending(&pool, &mut pending_images, &mut pending_metadata);
                    }
                    Ok(WorkItem::Metadata(metadata)) => {
                        pending_metadata.push_back(metadata);
                        match_pending(&pool, &mut pending_images, &mut pending_metadata);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            debug!(
                unmatched_images = pending_images.len(),
                unmatched_metadata = pending_metadata.len(),
                "Image consumer worker exiting"
            );
        });

        *worker = Some(Worker { sender, handle });
        info!("Image consumer started");
    }

    /// Stop the worker and wait for it to finish
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().unwrap().take() else {
            return;
        };

        // Dropping the sender disconnects the channel; the worker exits on
        // its next wake.
        drop(worker.sender);
        if worker.handle.join().is_err() {
            warn!("Image consumer worker panicked");
        }

        info!("Image consumer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().unwrap().is_some()
    }

    /// Producer side: hand over an image acquired from the reader.
    /// Called on the adapter's reader thread; never blocks on the pool.
    pub fn queue_image(&self, image: AcquiredImage) {
        self.send(WorkItem::Image(image));
    }

    /// Hand over completed-capture metadata together with the capture
    /// context that is not part of the device metadata.
    pub fn queue_metadata(
        &self,
        metadata: &CaptureMetadata,
        orientation: ScreenOrientation,
        raw_type: RawType,
    ) {
        self.send(WorkItem::Metadata(RawFrameMetadata {
            timestamp_ns: metadata.timestamp_ns,
            iso: metadata.iso,
            exposure_time_ns: metadata.exposure_time_ns,
            as_shot_neutral: metadata.as_shot_neutral,
            lens_shading_map: metadata.lens_shading_map.clone(),
            shading_map_width: metadata.shading_map_width,
            shading_map_height: metadata.shading_map_height,
            orientation,
            raw_type,
        }));
    }

    fn send(&self, item: WorkItem) {
        let sender = {
            let worker = self.worker.lock().unwrap();
            match worker.as_ref() {
                Some(w) => w.sender.clone(),
                None => {
                    warn!("Image consumer not running, dropping work item");
                    return;
                }
            }
        };

        // Worker may have exited between the check and the send
        let _ = sender.send(item);
    }
}

impl Drop for RawImageConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Publish every image/metadata pair with equal timestamps, then bound the
/// leftovers.
fn match_pending(
    pool: &Arc<RawBufferPool>,
    pending_images: &mut VecDeque<AcquiredImage>,
    pending_metadata: &mut VecDeque<RawFrameMetadata>,
) {
    loop {
        let Some((image_index, metadata_index)) = find_match(pending_images, pending_metadata)
        else {
            break;
        };

        let image = pending_images.remove(image_index).unwrap();
        let metadata = pending_metadata.remove(metadata_index).unwrap();
        publish(pool, image, metadata);
    }

    while pending_images.len() > MAX_PENDING_MATCHES {
        let dropped = pending_images.pop_front().unwrap();
        debug!(timestamp = dropped.timestamp_ns, "Dropping unmatched image");
    }

    while pending_metadata.len() > MAX_PENDING_MATCHES {
        let dropped = pending_metadata.pop_front().unwrap();
        debug!(
            timestamp = dropped.timestamp_ns,
            "Dropping unmatched metadata"
        );
    }
}

fn find_match(
    pending_images: &VecDeque<AcquiredImage>,
    pending_metadata: &VecDeque<RawFrameMetadata>,
) -> Option<(usize, usize)> {
    for (image_index, image) in pending_images.iter().enumerate() {
        if let Some(metadata_index) = pending_metadata
            .iter()
            .position(|m| m.timestamp_ns == image.timestamp_ns)
        {
            return Some((image_index, metadata_index));
        }
    }

    None
}

fn publish(pool: &Arc<RawBufferPool>, image: AcquiredImage, metadata: RawFrameMetadata) {
    let Some(buffer) = pool.dequeue_unused() else {
        warn!(
            timestamp = image.timestamp_ns,
            "No pool buffers, dropping frame"
        );
        return;
    };

    {
        let mut locked = buffer.lock().unwrap();
        locked.width = image.width;
        locked.height = image.height;
        locked.row_stride = image.row_stride;
        locked.pixel_format = image.pixel_format;
        locked.write_payload(&image.data);
        locked.metadata = metadata;
    }

    pool.enqueue_ready(buffer);
}
