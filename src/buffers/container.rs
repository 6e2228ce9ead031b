// SPDX-License-Identifier: GPL-3.0-only

//! Raw capture container
//!
//! A container packages a set of raw frames with the camera description and
//! post-processing settings so the downstream processor can develop them
//! later. The first capture of a session is kept in memory as the "pending"
//! container for immediate processing; subsequent captures are serialized
//! to disk.
//!
//! The on-disk layout is a minimal envelope: magic, a JSON header carrying
//! everything but pixel data, then the frame payloads concatenated in
//! header order. It is an interchange artifact, not an archival format.

use crate::buffers::{RawFrameMetadata, SharedRawBuffer};
use crate::descriptor::CameraDescriptor;
use crate::settings::PostProcessSettings;
use crate::types::RawPixelFormat;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

const CONTAINER_MAGIC: &[u8; 8] = b"RAWCONT1";

/// One packaged frame: copied payload plus its capture metadata
#[derive(Debug, Clone)]
pub struct ContainerFrame {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub row_stride: usize,
    pub pixel_format: RawPixelFormat,
    pub metadata: RawFrameMetadata,
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FrameHeader {
    name: String,
    width: u32,
    height: u32,
    row_stride: usize,
    pixel_format: RawPixelFormat,
    metadata: RawFrameMetadata,
    payload_len: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContainerHeader {
    descriptor: CameraDescriptor,
    settings: PostProcessSettings,
    reference_timestamp: i64,
    is_hdr: bool,
    write_dng: bool,
    frames: Vec<FrameHeader>,
}

/// A set of raw frames packaged for the downstream processor
#[derive(Debug)]
pub struct RawContainer {
    descriptor: CameraDescriptor,
    settings: PostProcessSettings,
    reference_timestamp: i64,
    is_hdr: bool,
    write_dng: bool,
    frames: Vec<ContainerFrame>,
}

impl RawContainer {
    /// Package the given pool buffers by copying their payloads out.
    ///
    /// Frames are named `frame0.raw`, `frame1.raw`, ... in input order.
    /// Each buffer's payload lock is held only for the duration of its copy.
    pub fn from_buffers(
        descriptor: &CameraDescriptor,
        settings: &PostProcessSettings,
        reference_timestamp: i64,
        is_hdr: bool,
        write_dng: bool,
        buffers: &[SharedRawBuffer],
    ) -> Self {
        let mut frames = Vec::with_capacity(buffers.len());

        for (index, buffer) in buffers.iter().enumerate() {
            let mut locked = buffer.lock().unwrap_or_else(|e| e.into_inner());
            let payload = locked.data.copy_payload();

            frames.push(ContainerFrame {
                name: format!("frame{}.raw", index),
                width: locked.width,
                height: locked.height,
                row_stride: locked.row_stride,
                pixel_format: locked.pixel_format,
                metadata: locked.metadata.clone(),
                payload,
            });
        }

        Self {
            descriptor: descriptor.clone(),
            settings: settings.clone(),
            reference_timestamp,
            is_hdr,
            write_dng,
            frames,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[ContainerFrame] {
        &self.frames
    }

    pub fn is_hdr(&self) -> bool {
        self.is_hdr
    }

    pub fn write_dng(&self) -> bool {
        self.write_dng
    }

    pub fn reference_timestamp(&self) -> i64 {
        self.reference_timestamp
    }

    pub fn settings(&self) -> &PostProcessSettings {
        &self.settings
    }

    pub fn descriptor(&self) -> &CameraDescriptor {
        &self.descriptor
    }

    /// Serialize the container to `path`
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let header = ContainerHeader {
            descriptor: self.descriptor.clone(),
            settings: self.settings.clone(),
            reference_timestamp: self.reference_timestamp,
            is_hdr: self.is_hdr,
            write_dng: self.write_dng,
            frames: self
                .frames
                .iter()
                .map(|f| FrameHeader {
                    name: f.name.clone(),
                    width: f.width,
                    height: f.height,
                    row_stride: f.row_stride,
                    pixel_format: f.pixel_format,
                    metadata: f.metadata.clone(),
                    payload_len: f.payload.len() as u64,
                })
                .collect(),
        };

        let header_json = serde_json::to_vec(&header).map_err(io::Error::other)?;

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(CONTAINER_MAGIC)?;
        writer.write_all(&(header_json.len() as u32).to_le_bytes())?;
        writer.write_all(&header_json)?;

        for frame in &self.frames {
            writer.write_all(&frame.payload)?;
        }

        writer.flush()?;

        info!(
            path = %path.display(),
            frames = self.frames.len(),
            hdr = self.is_hdr,
            "Saved raw container"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::RawImageBuffer;
    use std::sync::{Arc, Mutex};

    fn test_buffer(timestamp_ns: i64, fill: u8) -> SharedRawBuffer {
        let mut buffer = RawImageBuffer::host_allocated(4, 2, RawPixelFormat::Raw16);
        buffer.write_payload(&[fill; 16]);
        buffer.metadata.timestamp_ns = timestamp_ns;
        Arc::new(Mutex::new(buffer))
    }

    #[test]
    fn test_from_buffers_copies_payloads() {
        let buffers = vec![test_buffer(1, 0x11), test_buffer(2, 0x22)];
        let container = RawContainer::from_buffers(
            &CameraDescriptor::default(),
            &PostProcessSettings::default(),
            1,
            true,
            false,
            &buffers,
        );

        assert_eq!(container.num_frames(), 2);
        assert_eq!(container.frames()[0].name, "frame0.raw");
        assert_eq!(container.frames()[0].payload, vec![0x11; 16]);
        assert_eq!(container.frames()[1].metadata.timestamp_ns, 2);
    }

    #[test]
    fn test_save_writes_magic_and_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burst.rawcont");

        let buffers = vec![test_buffer(7, 0x5A)];
        let container = RawContainer::from_buffers(
            &CameraDescriptor::default(),
            &PostProcessSettings::default(),
            7,
            false,
            true,
            &buffers,
        );
        container.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], CONTAINER_MAGIC);

        let header_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let header: ContainerHeader = serde_json::from_slice(&bytes[12..12 + header_len]).unwrap();
        assert_eq!(header.frames.len(), 1);
        assert_eq!(header.frames[0].payload_len, 16);
        assert!(header.write_dng);

        assert_eq!(&bytes[12 + header_len..], &[0x5A; 16]);
    }
}
