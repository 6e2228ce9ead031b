// SPDX-License-Identifier: GPL-3.0-only

//! Raw frame buffers
//!
//! A [`RawImageBuffer`] represents one sensor readout: a lockable byte
//! payload plus per-frame metadata. Buffers are allocated once by the image
//! reader pipeline, owned by the [`pool::RawBufferPool`] for their whole
//! lifetime, and loaned out under scoped [`pool::LockedBuffers`] handles.

pub mod container;
pub mod pool;

use crate::types::{RawPixelFormat, RawType, ScreenOrientation};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Whether a payload lock is for reading or writing.
///
/// CPU-backed buffers ignore the distinction; GPU or file-backed stores use
/// it to skip writeback on read-only access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockIntent {
    Read,
    Write,
}

/// Backing store for a raw frame payload.
///
/// The store may be CPU memory, GPU memory, or a file-backed page; callers
/// must bracket access with `lock`/`unlock`.
pub trait NativeBuffer: Send {
    /// Map the payload and return the backing bytes. Panics if already
    /// locked; the pool's ownership rules make double-locking a logic error.
    fn lock(&mut self, intent: LockIntent) -> &mut [u8];

    /// Release the mapping obtained by `lock`
    fn unlock(&mut self);

    /// Payload length in bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the payload out. Locks for read internally.
    fn copy_payload(&mut self) -> Vec<u8> {
        let copied = self.lock(LockIntent::Read).to_vec();
        self.unlock();
        copied
    }
}

/// Plain CPU-memory payload store
#[derive(Debug, Default)]
pub struct HostBuffer {
    data: Vec<u8>,
    locked: bool,
}

impl HostBuffer {
    /// Allocate a zero-filled payload of `len` bytes
    pub fn with_len(len: usize) -> Self {
        Self {
            data: vec![0; len],
            locked: false,
        }
    }
}

impl NativeBuffer for HostBuffer {
    fn lock(&mut self, _intent: LockIntent) -> &mut [u8] {
        assert!(!self.locked, "HostBuffer locked twice");
        self.locked = true;
        &mut self.data
    }

    fn unlock(&mut self) {
        self.locked = false;
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// Per-frame metadata recorded at capture time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrameMetadata {
    /// Monotonic sensor timestamp in nanoseconds
    pub timestamp_ns: i64,
    pub iso: i32,
    pub exposure_time_ns: i64,
    /// As-shot neutral white balance point
    pub as_shot_neutral: [f32; 3],
    /// Low-resolution lens shading gain map, row-major RGGB interleaved
    pub lens_shading_map: Vec<f32>,
    pub shading_map_width: u32,
    pub shading_map_height: u32,
    /// Screen orientation when the frame was captured
    pub orientation: ScreenOrientation,
    /// ZSL (repeating stream) or HDR (bracket burst)
    pub raw_type: RawType,
}

impl Default for RawFrameMetadata {
    fn default() -> Self {
        Self {
            timestamp_ns: 0,
            iso: 0,
            exposure_time_ns: 0,
            as_shot_neutral: [1.0, 1.0, 1.0],
            lens_shading_map: Vec::new(),
            shading_map_width: 0,
            shading_map_height: 0,
            orientation: ScreenOrientation::Portrait,
            raw_type: RawType::Zsl,
        }
    }
}

/// One sensor readout: payload plus metadata
pub struct RawImageBuffer {
    pub data: Box<dyn NativeBuffer>,
    pub width: u32,
    pub height: u32,
    pub row_stride: usize,
    pub pixel_format: RawPixelFormat,
    pub metadata: RawFrameMetadata,
}

impl RawImageBuffer {
    /// Allocate a CPU-backed buffer for the given geometry
    pub fn host_allocated(width: u32, height: u32, pixel_format: RawPixelFormat) -> Self {
        let row_stride = pixel_format.min_row_bytes(width);
        Self {
            data: Box::new(HostBuffer::with_len(row_stride * height as usize)),
            width,
            height,
            row_stride,
            pixel_format,
            metadata: RawFrameMetadata::default(),
        }
    }

    /// Overwrite the payload with `bytes`, truncating to the buffer length
    pub fn write_payload(&mut self, bytes: &[u8]) {
        let dest = self.data.lock(LockIntent::Write);
        let n = bytes.len().min(dest.len());
        dest[..n].copy_from_slice(&bytes[..n]);
        self.data.unlock();
    }
}

impl std::fmt::Debug for RawImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("row_stride", &self.row_stride)
            .field("pixel_format", &self.pixel_format)
            .field("timestamp_ns", &self.metadata.timestamp_ns)
            .field("raw_type", &self.metadata.raw_type)
            .finish()
    }
}

/// Buffers move between pool partitions behind shared handles
pub type SharedRawBuffer = Arc<Mutex<RawImageBuffer>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_buffer_lock_cycle() {
        let mut buf = HostBuffer::with_len(16);
        {
            let bytes = buf.lock(LockIntent::Write);
            bytes[0] = 0xAB;
        }
        buf.unlock();
        assert_eq!(buf.copy_payload()[0], 0xAB);
    }

    #[test]
    #[should_panic(expected = "locked twice")]
    fn test_double_lock_panics() {
        let mut buf = HostBuffer::with_len(4);
        buf.lock(LockIntent::Read);
        buf.lock(LockIntent::Read);
    }

    #[test]
    fn test_host_allocated_geometry() {
        let buf = RawImageBuffer::host_allocated(8, 2, RawPixelFormat::Raw16);
        assert_eq!(buf.row_stride, 16);
        assert_eq!(buf.data.len(), 32);
    }

    #[test]
    fn test_write_payload_truncates() {
        let mut buf = RawImageBuffer::host_allocated(2, 1, RawPixelFormat::Raw16);
        buf.write_payload(&[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(buf.data.copy_payload(), vec![1, 2, 3, 4]);
    }
}
