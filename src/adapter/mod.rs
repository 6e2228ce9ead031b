// SPDX-License-Identifier: GPL-3.0-only

//! Device adapter contract
//!
//! A narrow interface around the platform camera stack. The session
//! controller drives it exclusively from the event-loop thread; callbacks
//! arrive on adapter-owned threads and must not be processed inline — the
//! controller translates them into events and returns immediately.
//!
//! The [`sim`] module provides an in-process implementation for tests and
//! hosts without hardware.

pub mod sim;

use crate::descriptor::CameraDescriptor;
use crate::errors::AdapterResult;
use crate::types::{CameraExposureState, CameraFocusState, RawPixelFormat};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifier of a submitted capture sequence
pub type SequenceId = i32;

/// Capture subject a submission belongs to.
///
/// Each open session keeps one callback context per tag; the contexts
/// outlive every in-flight capture and are torn down only after the
/// session and device handles are released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CaptureTag {
    /// The continuously repeating preview/ZSL request
    Repeat,
    /// One-shot capture that starts an autofocus trigger
    TriggerAf,
    /// One-shot capture that cancels an autofocus trigger
    CancelAf,
    /// Bracketed HDR burst
    HdrCapture,
}

/// Request parameter keys understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ControlTag {
    CaptureIntent,
    ControlMode,
    TonemapMode,
    ShadingMode,
    ColorCorrectionMode,
    LensShadingMapStatsMode,
    LensShadingApplied,
    AntiBandingMode,
    NoiseReductionMode,
    OisMode,
    AeMode,
    AfMode,
    AwbMode,
    AfTrigger,
    AePrecaptureTrigger,
    AeExposureCompensation,
    SensorSensitivity,
    SensorExposureTime,
    AfRegions,
    AeRegions,
}

/// Typed value of a request entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEntry {
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

impl ControlEntry {
    pub fn as_u8(&self) -> Option<u8> {
        match self {
            ControlEntry::U8(values) => values.first().copied(),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ControlEntry::I32(values) => values.first().copied(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ControlEntry::I64(values) => values.first().copied(),
            _ => None,
        }
    }
}

/// Numeric values for u8-typed control entries, matching the platform's
/// control enumerations.
pub mod control_values {
    pub const CAPTURE_INTENT_ZERO_SHUTTER_LAG: u8 = 5;
    pub const CONTROL_MODE_AUTO: u8 = 1;
    pub const TONEMAP_MODE_FAST: u8 = 1;
    pub const SHADING_MODE_FAST: u8 = 1;
    pub const COLOR_CORRECTION_MODE_HIGH_QUALITY: u8 = 2;
    pub const LENS_SHADING_MAP_STATS_ON: u8 = 1;
    pub const LENS_SHADING_APPLIED_FALSE: u8 = 0;
    pub const ANTIBANDING_MODE_AUTO: u8 = 3;
    pub const NOISE_REDUCTION_MODE_FAST: u8 = 1;

    pub const OIS_MODE_OFF: u8 = 0;
    pub const OIS_MODE_ON: u8 = 1;

    pub const AE_MODE_OFF: u8 = 0;
    pub const AE_MODE_ON: u8 = 1;

    pub const AF_MODE_OFF: u8 = 0;
    pub const AF_MODE_AUTO: u8 = 1;
    pub const AF_MODE_CONTINUOUS_PICTURE: u8 = 4;

    pub const AWB_MODE_AUTO: u8 = 1;

    pub const TRIGGER_IDLE: u8 = 0;
    pub const TRIGGER_START: u8 = 1;
    pub const TRIGGER_CANCEL: u8 = 2;
}

/// Request template to build from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    ZeroShutterLag,
}

/// Output streams a request can target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget {
    /// The host's preview surface
    Preview,
    /// The raw image reader feeding the buffer pool
    RawReader,
}

/// Geometry of the raw output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfiguration {
    pub width: u32,
    pub height: u32,
    pub format: RawPixelFormat,
}

/// Which output streams a capture session is configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOutputs {
    pub preview: bool,
    pub raw_reader: bool,
}

/// A mutable capture request owned by the controller.
///
/// Entries are uniformly typed; setting an entry replaces any previous
/// value and `clear` removes it (the platform equivalent of setting with
/// count zero).
pub trait CaptureRequestHandle: Send {
    fn set_u8(&mut self, tag: ControlTag, values: &[u8]);
    fn set_i32(&mut self, tag: ControlTag, values: &[i32]);
    fn set_i64(&mut self, tag: ControlTag, values: &[i64]);
    fn clear(&mut self, tag: ControlTag);
    fn entry(&self, tag: ControlTag) -> Option<ControlEntry>;

    fn add_target(&mut self, target: OutputTarget);
    fn remove_target(&mut self, target: OutputTarget);
    fn targets(&self) -> Vec<OutputTarget>;
}

/// Immutable copy of a request's entries and targets, as submitted
#[derive(Debug, Clone, Default)]
pub struct RequestSnapshot {
    pub entries: BTreeMap<ControlTag, ControlEntry>,
    pub targets: Vec<OutputTarget>,
}

impl RequestSnapshot {
    pub fn entry(&self, tag: ControlTag) -> Option<&ControlEntry> {
        self.entries.get(&tag)
    }
}

/// Metadata delivered with a completed capture
#[derive(Debug, Clone)]
pub struct CaptureMetadata {
    pub timestamp_ns: i64,
    pub iso: i32,
    pub exposure_time_ns: i64,
    pub ae_state: CameraExposureState,
    pub af_state: CameraFocusState,
    pub as_shot_neutral: [f32; 3],
    pub lens_shading_map: Vec<f32>,
    pub shading_map_width: u32,
    pub shading_map_height: u32,
}

impl Default for CaptureMetadata {
    fn default() -> Self {
        Self {
            timestamp_ns: 0,
            iso: 0,
            exposure_time_ns: 0,
            ae_state: CameraExposureState::Inactive,
            af_state: CameraFocusState::Inactive,
            as_shot_neutral: [1.0, 1.0, 1.0],
            lens_shading_map: Vec::new(),
            shading_map_width: 0,
            shading_map_height: 0,
        }
    }
}

/// Why a single capture failed
#[derive(Debug, Clone)]
pub struct CaptureFailure {
    pub frame_number: i64,
    pub reason: String,
}

/// A sensor frame acquired from the image reader
#[derive(Debug, Clone)]
pub struct AcquiredImage {
    pub timestamp_ns: i64,
    pub width: u32,
    pub height: u32,
    pub row_stride: usize,
    pub pixel_format: RawPixelFormat,
    pub data: Vec<u8>,
}

/// Device-level callbacks (adapter threads)
pub trait DeviceStateCallbacks: Send + Sync {
    fn on_error(&self, error: i32);
    fn on_disconnected(&self);
}

/// Session-level state callbacks (adapter threads)
pub trait SessionStateCallbacks: Send + Sync {
    fn on_active(&self);
    fn on_ready(&self);
    fn on_closed(&self);
}

/// Per-capture callbacks (adapter threads).
///
/// One implementation is registered per [`CaptureTag`]; the adapter invokes
/// the instance that was supplied with the submission.
#[allow(unused_variables)]
pub trait CaptureCallbacks: Send + Sync {
    fn on_started(&self, timestamp_ns: i64) {}
    fn on_completed(&self, metadata: &CaptureMetadata);
    fn on_progressed(&self, metadata: &CaptureMetadata) {}
    fn on_failed(&self, failure: &CaptureFailure) {}
    fn on_buffer_lost(&self, frame_number: i64) {}
    fn on_sequence_completed(&self, sequence_id: SequenceId, last_frame_number: i64) {}
    fn on_sequence_aborted(&self, sequence_id: SequenceId) {}
}

/// Image-available callback (adapter reader thread)
pub trait ImageListener: Send + Sync {
    fn on_image_available(&self, reader: &dyn ImageReaderHandle);
}

/// Handle to the raw image reader
pub trait ImageReaderHandle: Send + Sync {
    /// Acquire the next available image, oldest first; `None` when the
    /// reader is drained. Listeners loop until empty.
    fn acquire_latest_image(&self) -> Option<AcquiredImage>;
}

/// An open capture session
pub trait CaptureSessionHandle: Send {
    /// Replace the repeating request. Returns the new sequence id.
    fn set_repeating_request(
        &mut self,
        request: &dyn CaptureRequestHandle,
        callbacks: Arc<dyn CaptureCallbacks>,
    ) -> AdapterResult<SequenceId>;

    /// Submit a one-shot ordered burst
    fn capture(
        &mut self,
        requests: &[&dyn CaptureRequestHandle],
        callbacks: Arc<dyn CaptureCallbacks>,
    ) -> AdapterResult<SequenceId>;

    /// Abort all in-flight captures
    fn abort_captures(&mut self) -> AdapterResult<()>;

    /// Stop the repeating request without tearing the session down
    fn stop_repeating(&mut self) -> AdapterResult<()>;
}

/// An open camera device
pub trait DeviceHandle: Send {
    fn id(&self) -> &str;

    /// Build a capture request from a template. The handle owns adapter
    /// memory and is released on drop.
    fn create_request(
        &mut self,
        template: RequestTemplate,
    ) -> AdapterResult<Box<dyn CaptureRequestHandle>>;

    /// Create the raw image reader for this device. At most
    /// `max_images` frames are held before the oldest is dropped.
    fn create_image_reader(
        &mut self,
        config: OutputConfiguration,
        max_images: usize,
        listener: Arc<dyn ImageListener>,
    ) -> AdapterResult<Box<dyn ImageReaderHandle>>;

    /// Create a capture session over the configured outputs
    fn create_session(
        &mut self,
        outputs: SessionOutputs,
        callbacks: Arc<dyn SessionStateCallbacks>,
    ) -> AdapterResult<Box<dyn CaptureSessionHandle>>;
}

/// Entry point to a platform camera implementation
pub trait DeviceAdapter: Send + Sync {
    /// Describe the device without opening it
    fn describe(&self, device_id: &str) -> AdapterResult<CameraDescriptor>;

    /// Open a device. State callbacks fire on adapter threads until the
    /// returned handle is dropped.
    fn open(
        &self,
        device_id: &str,
        callbacks: Arc<dyn DeviceStateCallbacks>,
    ) -> AdapterResult<Box<dyn DeviceHandle>>;
}
