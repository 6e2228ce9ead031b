// SPDX-License-Identifier: GPL-3.0-only

//! Simulated device adapter
//!
//! An in-process implementation of the adapter contract backed by a
//! scripted sensor. Integration tests drive it explicitly: frames appear
//! only when the test says so, bursts complete only when told to, and every
//! submission is recorded for inspection. Hosts without hardware can use it
//! as a stand-in camera.

use crate::adapter::{
    control_values, AcquiredImage, CaptureCallbacks, CaptureMetadata, CaptureRequestHandle,
    CaptureSessionHandle, ControlEntry, ControlTag, DeviceAdapter, DeviceHandle,
    DeviceStateCallbacks, ImageListener, ImageReaderHandle, OutputConfiguration,
    OutputTarget, RequestSnapshot, RequestTemplate, SequenceId, SessionOutputs,
    SessionStateCallbacks,
};
use crate::descriptor::CameraDescriptor;
use crate::errors::{AdapterError, AdapterResult};
use crate::types::{CameraExposureState, CameraFocusState};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// ISO the simulated auto-exposure settles on
const AUTO_ISO: i32 = 125;
/// Exposure time the simulated auto-exposure settles on (1/60 s)
const AUTO_EXPOSURE_NS: i64 = 16_666_667;
/// Simulated frame interval (30 fps)
const FRAME_INTERVAL_NS: i64 = 33_333_333;

struct SubmittedRepeat {
    id: SequenceId,
    snapshot: RequestSnapshot,
    callbacks: Arc<dyn CaptureCallbacks>,
}

struct SubmittedBurst {
    id: SequenceId,
    snapshots: Vec<RequestSnapshot>,
    callbacks: Arc<dyn CaptureCallbacks>,
    delivered: usize,
}

#[derive(Default)]
struct SimState {
    device_open: bool,
    device_callbacks: Option<Arc<dyn DeviceStateCallbacks>>,
    session_callbacks: Option<Arc<dyn SessionStateCallbacks>>,
    session_active: bool,
    image_listener: Option<Arc<dyn ImageListener>>,
    reader: Option<Arc<SimImageReader>>,
    reader_config: Option<OutputConfiguration>,
    repeating: Option<SubmittedRepeat>,
    bursts: Vec<SubmittedBurst>,
    next_sequence_id: SequenceId,
    repeating_submissions: usize,
    abort_count: usize,
    stop_repeating_count: usize,
    clock_ns: i64,
}

struct SimCore {
    state: Mutex<SimState>,
}

impl SimCore {
    fn next_sequence_id(state: &mut SimState) -> SequenceId {
        state.next_sequence_id += 1;
        state.next_sequence_id
    }
}

/// Simulated request: entries and targets held in plain maps
struct SimRequest {
    entries: BTreeMap<ControlTag, ControlEntry>,
    targets: Vec<OutputTarget>,
}

impl SimRequest {
    fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            entries: self.entries.clone(),
            targets: self.targets.clone(),
        }
    }
}

impl CaptureRequestHandle for SimRequest {
    fn set_u8(&mut self, tag: ControlTag, values: &[u8]) {
        self.entries.insert(tag, ControlEntry::U8(values.to_vec()));
    }

    fn set_i32(&mut self, tag: ControlTag, values: &[i32]) {
        self.entries.insert(tag, ControlEntry::I32(values.to_vec()));
    }

    fn set_i64(&mut self, tag: ControlTag, values: &[i64]) {
        self.entries.insert(tag, ControlEntry::I64(values.to_vec()));
    }

    fn clear(&mut self, tag: ControlTag) {
        self.entries.remove(&tag);
    }

    fn entry(&self, tag: ControlTag) -> Option<ControlEntry> {
        self.entries.get(&tag).cloned()
    }

    fn add_target(&mut self, target: OutputTarget) {
        if !self.targets.contains(&target) {
            self.targets.push(target);
        }
    }

    fn remove_target(&mut self, target: OutputTarget) {
        self.targets.retain(|t| *t != target);
    }

    fn targets(&self) -> Vec<OutputTarget> {
        self.targets.clone()
    }
}

/// Bounded image queue standing in for the platform reader
struct SimImageReader {
    images: Mutex<VecDeque<AcquiredImage>>,
    max_images: usize,
}

impl SimImageReader {
    fn push(&self, image: AcquiredImage) {
        let mut images = self.images.lock().unwrap();
        while images.len() >= self.max_images {
            // Reader depth exceeded; oldest frame is lost
            images.pop_front();
        }
        images.push_back(image);
    }
}

impl ImageReaderHandle for SimImageReader {
    fn acquire_latest_image(&self) -> Option<AcquiredImage> {
        self.images.lock().unwrap().pop_front()
    }
}

struct SimReaderRef(Arc<SimImageReader>);

impl ImageReaderHandle for SimReaderRef {
    fn acquire_latest_image(&self) -> Option<AcquiredImage> {
        self.0.acquire_latest_image()
    }
}

struct SimSessionHandle {
    core: Arc<SimCore>,
}

impl CaptureSessionHandle for SimSessionHandle {
    fn set_repeating_request(
        &mut self,
        request: &dyn CaptureRequestHandle,
        callbacks: Arc<dyn CaptureCallbacks>,
    ) -> AdapterResult<SequenceId> {
        let snapshot = snapshot_of(request);

        let (id, session_callbacks) = {
            let mut state = self.core.state.lock().unwrap();
            let id = SimCore::next_sequence_id(&mut state);
            state.repeating = Some(SubmittedRepeat {
                id,
                snapshot,
                callbacks,
            });
            state.repeating_submissions += 1;

            let fire_active = !state.session_active;
            state.session_active = true;
            (id, fire_active.then(|| state.session_callbacks.clone()).flatten())
        };

        if let Some(callbacks) = session_callbacks {
            callbacks.on_active();
        }

        Ok(id)
    }

    fn capture(
        &mut self,
        requests: &[&dyn CaptureRequestHandle],
        callbacks: Arc<dyn CaptureCallbacks>,
    ) -> AdapterResult<SequenceId> {
        let snapshots: Vec<RequestSnapshot> = requests.iter().map(|r| snapshot_of(*r)).collect();

        let mut state = self.core.state.lock().unwrap();
        let id = SimCore::next_sequence_id(&mut state);
        debug!(sequence = id, requests = snapshots.len(), "Sim burst submitted");
        state.bursts.push(SubmittedBurst {
            id,
            snapshots,
            callbacks,
            delivered: 0,
        });

        Ok(id)
    }

    fn abort_captures(&mut self) -> AdapterResult<()> {
        self.core.state.lock().unwrap().abort_count += 1;
        Ok(())
    }

    fn stop_repeating(&mut self) -> AdapterResult<()> {
        let session_callbacks = {
            let mut state = self.core.state.lock().unwrap();
            state.stop_repeating_count += 1;
            state.repeating = None;
            let was_active = state.session_active;
            state.session_active = false;
            was_active.then(|| state.session_callbacks.clone()).flatten()
        };

        if let Some(callbacks) = session_callbacks {
            callbacks.on_ready();
        }

        Ok(())
    }
}

impl Drop for SimSessionHandle {
    fn drop(&mut self) {
        let session_callbacks = {
            let mut state = self.core.state.lock().unwrap();
            state.session_active = false;
            state.repeating = None;
            state.session_callbacks.take()
        };

        if let Some(callbacks) = session_callbacks {
            callbacks.on_closed();
        }
    }
}

fn snapshot_of(request: &dyn CaptureRequestHandle) -> RequestSnapshot {
    let mut entries = BTreeMap::new();
    for tag in [
        ControlTag::CaptureIntent,
        ControlTag::ControlMode,
        ControlTag::TonemapMode,
        ControlTag::ShadingMode,
        ControlTag::ColorCorrectionMode,
        ControlTag::LensShadingMapStatsMode,
        ControlTag::LensShadingApplied,
        ControlTag::AntiBandingMode,
        ControlTag::NoiseReductionMode,
        ControlTag::OisMode,
        ControlTag::AeMode,
        ControlTag::AfMode,
        ControlTag::AwbMode,
        ControlTag::AfTrigger,
        ControlTag::AePrecaptureTrigger,
        ControlTag::AeExposureCompensation,
        ControlTag::SensorSensitivity,
        ControlTag::SensorExposureTime,
        ControlTag::AfRegions,
        ControlTag::AeRegions,
    ] {
        if let Some(entry) = request.entry(tag) {
            entries.insert(tag, entry);
        }
    }

    RequestSnapshot {
        entries,
        targets: request.targets(),
    }
}

struct SimDeviceHandle {
    id: String,
    core: Arc<SimCore>,
}

impl DeviceHandle for SimDeviceHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_request(
        &mut self,
        _template: RequestTemplate,
    ) -> AdapterResult<Box<dyn CaptureRequestHandle>> {
        Ok(Box::new(SimRequest {
            entries: BTreeMap::new(),
            targets: Vec::new(),
        }))
    }

    fn create_image_reader(
        &mut self,
        config: OutputConfiguration,
        max_images: usize,
        listener: Arc<dyn ImageListener>,
    ) -> AdapterResult<Box<dyn ImageReaderHandle>> {
        let reader = Arc::new(SimImageReader {
            images: Mutex::new(VecDeque::new()),
            max_images,
        });

        let mut state = self.core.state.lock().unwrap();
        state.reader = Some(Arc::clone(&reader));
        state.reader_config = Some(config);
        state.image_listener = Some(listener);

        Ok(Box::new(SimReaderRef(reader)))
    }

    fn create_session(
        &mut self,
        _outputs: SessionOutputs,
        callbacks: Arc<dyn SessionStateCallbacks>,
    ) -> AdapterResult<Box<dyn CaptureSessionHandle>> {
        {
            let mut state = self.core.state.lock().unwrap();
            state.session_callbacks = Some(Arc::clone(&callbacks));
        }

        // A freshly configured session is ready but not yet capturing
        callbacks.on_ready();

        Ok(Box::new(SimSessionHandle {
            core: Arc::clone(&self.core),
        }))
    }
}

impl Drop for SimDeviceHandle {
    fn drop(&mut self) {
        let mut state = self.core.state.lock().unwrap();
        state.device_open = false;
        state.device_callbacks = None;
        state.image_listener = None;
        state.reader = None;
    }
}

/// Simulated camera adapter
pub struct SimAdapter {
    core: Arc<SimCore>,
    descriptor: CameraDescriptor,
    fail_open: Mutex<Option<AdapterError>>,
}

impl SimAdapter {
    pub fn new(descriptor: CameraDescriptor) -> Self {
        Self {
            core: Arc::new(SimCore {
                state: Mutex::new(SimState {
                    clock_ns: 1_000_000_000,
                    ..SimState::default()
                }),
            }),
            descriptor,
            fail_open: Mutex::new(None),
        }
    }

    /// Make the next `open` call fail with `error`
    pub fn fail_next_open(&self, error: AdapterError) {
        *self.fail_open.lock().unwrap() = Some(error);
    }

    /// Produce one frame from the repeating request: capture callbacks fire
    /// and an image lands in the reader. Returns the frame timestamp, or
    /// `None` when no repeating request is in flight.
    pub fn fire_repeating_frame(&self) -> Option<i64> {
        let (snapshot, callbacks, timestamp_ns) = {
            let mut state = self.core.state.lock().unwrap();
            let repeating = state.repeating.as_ref()?;
            let snapshot = repeating.snapshot.clone();
            let callbacks = Arc::clone(&repeating.callbacks);
            state.clock_ns += FRAME_INTERVAL_NS;
            (snapshot, callbacks, state.clock_ns)
        };

        let metadata = self.metadata_for(&snapshot, timestamp_ns);
        callbacks.on_started(timestamp_ns);
        callbacks.on_completed(&metadata);
        self.deliver_image(timestamp_ns);

        Some(timestamp_ns)
    }

    /// Deliver up to `count` frames from the burst `sequence_id`. Each frame
    /// fires capture callbacks and lands an image in the reader. Returns how
    /// many frames were actually delivered.
    pub fn deliver_burst_frames(&self, sequence_id: SequenceId, count: usize) -> usize {
        let mut delivered = 0;

        for _ in 0..count {
            let next = {
                let mut state = self.core.state.lock().unwrap();
                let Some(burst) = state.bursts.iter_mut().find(|b| b.id == sequence_id) else {
                    warn!(sequence = sequence_id, "No such burst");
                    return delivered;
                };
                if burst.delivered >= burst.snapshots.len() {
                    None
                } else {
                    let snapshot = burst.snapshots[burst.delivered].clone();
                    let callbacks = Arc::clone(&burst.callbacks);
                    burst.delivered += 1;
                    state.clock_ns += FRAME_INTERVAL_NS;
                    Some((snapshot, callbacks, state.clock_ns))
                }
            };

            let Some((snapshot, callbacks, timestamp_ns)) = next else {
                break;
            };

            let metadata = self.metadata_for(&snapshot, timestamp_ns);
            callbacks.on_started(timestamp_ns);
            callbacks.on_completed(&metadata);
            self.deliver_image(timestamp_ns);
            delivered += 1;
        }

        delivered
    }

    /// Report the burst `sequence_id` complete
    pub fn complete_sequence(&self, sequence_id: SequenceId) {
        let callbacks = {
            let state = self.core.state.lock().unwrap();
            state
                .bursts
                .iter()
                .find(|b| b.id == sequence_id)
                .map(|b| (Arc::clone(&b.callbacks), b.delivered as i64))
        };

        if let Some((callbacks, last_frame)) = callbacks {
            callbacks.on_sequence_completed(sequence_id, last_frame);
        }
    }

    /// Report the burst `sequence_id` aborted
    pub fn abort_sequence(&self, sequence_id: SequenceId) {
        let callbacks = {
            let state = self.core.state.lock().unwrap();
            state
                .bursts
                .iter()
                .find(|b| b.id == sequence_id)
                .map(|b| Arc::clone(&b.callbacks))
        };

        if let Some(callbacks) = callbacks {
            callbacks.on_sequence_aborted(sequence_id);
        }
    }

    /// Fire a device error callback
    pub fn fire_device_error(&self, error: i32) {
        let callbacks = self.core.state.lock().unwrap().device_callbacks.clone();
        if let Some(callbacks) = callbacks {
            callbacks.on_error(error);
        }
    }

    /// Fire a device disconnect callback
    pub fn fire_disconnected(&self) {
        let callbacks = self.core.state.lock().unwrap().device_callbacks.clone();
        if let Some(callbacks) = callbacks {
            callbacks.on_disconnected();
        }
    }

    /// Snapshot of the current repeating request, if one is in flight
    pub fn repeating_snapshot(&self) -> Option<RequestSnapshot> {
        self.core
            .state
            .lock()
            .unwrap()
            .repeating
            .as_ref()
            .map(|r| r.snapshot.clone())
    }

    /// How many times a repeating request has been (re)submitted
    pub fn repeating_submissions(&self) -> usize {
        self.core.state.lock().unwrap().repeating_submissions
    }

    /// Most recently submitted burst, as (sequence id, request snapshots)
    pub fn last_burst(&self) -> Option<(SequenceId, Vec<RequestSnapshot>)> {
        self.core
            .state
            .lock()
            .unwrap()
            .bursts
            .last()
            .map(|b| (b.id, b.snapshots.clone()))
    }

    /// Total number of bursts submitted so far
    pub fn burst_count(&self) -> usize {
        self.core.state.lock().unwrap().bursts.len()
    }

    pub fn abort_count(&self) -> usize {
        self.core.state.lock().unwrap().abort_count
    }

    pub fn stop_repeating_count(&self) -> usize {
        self.core.state.lock().unwrap().stop_repeating_count
    }

    pub fn is_session_active(&self) -> bool {
        self.core.state.lock().unwrap().session_active
    }

    fn metadata_for(&self, snapshot: &RequestSnapshot, timestamp_ns: i64) -> CaptureMetadata {
        let ae_on = snapshot
            .entry(ControlTag::AeMode)
            .and_then(|e| e.as_u8())
            .map(|mode| mode != control_values::AE_MODE_OFF)
            .unwrap_or(true);

        let (iso, exposure_time_ns) = if ae_on {
            (AUTO_ISO, AUTO_EXPOSURE_NS)
        } else {
            (
                snapshot
                    .entry(ControlTag::SensorSensitivity)
                    .and_then(|e| e.as_i32())
                    .unwrap_or(AUTO_ISO),
                snapshot
                    .entry(ControlTag::SensorExposureTime)
                    .and_then(|e| e.as_i64())
                    .unwrap_or(AUTO_EXPOSURE_NS),
            )
        };

        let af_triggered = snapshot
            .entry(ControlTag::AfTrigger)
            .and_then(|e| e.as_u8())
            .map(|t| t == control_values::TRIGGER_START)
            .unwrap_or(false);

        let af_state = if af_triggered {
            CameraFocusState::FocusLocked
        } else if snapshot.entry(ControlTag::AfMode).and_then(|e| e.as_u8())
            == Some(control_values::AF_MODE_CONTINUOUS_PICTURE)
        {
            CameraFocusState::PassiveFocused
        } else {
            CameraFocusState::Inactive
        };

        CaptureMetadata {
            timestamp_ns,
            iso,
            exposure_time_ns,
            ae_state: if ae_on {
                CameraExposureState::Converged
            } else {
                CameraExposureState::Inactive
            },
            af_state,
            as_shot_neutral: [0.45, 1.0, 0.55],
            lens_shading_map: vec![1.0; 16],
            shading_map_width: 2,
            shading_map_height: 2,
        }
    }

    fn deliver_image(&self, timestamp_ns: i64) {
        let (reader, listener, config) = {
            let state = self.core.state.lock().unwrap();
            (
                state.reader.clone(),
                state.image_listener.clone(),
                state.reader_config,
            )
        };

        let (Some(reader), Some(listener), Some(config)) = (reader, listener, config) else {
            return;
        };

        let row_stride = config.format.min_row_bytes(config.width);
        reader.push(AcquiredImage {
            timestamp_ns,
            width: config.width,
            height: config.height,
            row_stride,
            pixel_format: config.format,
            data: vec![(timestamp_ns & 0xFF) as u8; row_stride * config.height as usize],
        });

        listener.on_image_available(&SimReaderRef(reader));
    }
}

impl DeviceAdapter for SimAdapter {
    fn describe(&self, device_id: &str) -> AdapterResult<CameraDescriptor> {
        if device_id == self.descriptor.id {
            Ok(self.descriptor.clone())
        } else {
            Err(AdapterError::NotFound(device_id.to_string()))
        }
    }

    fn open(
        &self,
        device_id: &str,
        callbacks: Arc<dyn DeviceStateCallbacks>,
    ) -> AdapterResult<Box<dyn DeviceHandle>> {
        if let Some(error) = self.fail_open.lock().unwrap().take() {
            return Err(error);
        }

        if device_id != self.descriptor.id {
            return Err(AdapterError::NotFound(device_id.to_string()));
        }

        let mut state = self.core.state.lock().unwrap();
        if state.device_open {
            return Err(AdapterError::InUse(device_id.to_string()));
        }

        state.device_open = true;
        state.device_callbacks = Some(callbacks);

        Ok(Box::new(SimDeviceHandle {
            id: device_id.to_string(),
            core: Arc::clone(&self.core),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawPixelFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullDeviceCallbacks;
    impl DeviceStateCallbacks for NullDeviceCallbacks {
        fn on_error(&self, _error: i32) {}
        fn on_disconnected(&self) {}
    }

    struct CountingSessionCallbacks {
        active: AtomicUsize,
        ready: AtomicUsize,
        closed: AtomicUsize,
    }

    impl CountingSessionCallbacks {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                active: AtomicUsize::new(0),
                ready: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            })
        }
    }

    impl SessionStateCallbacks for CountingSessionCallbacks {
        fn on_active(&self) {
            self.active.fetch_add(1, Ordering::SeqCst);
        }
        fn on_ready(&self) {
            self.ready.fetch_add(1, Ordering::SeqCst);
        }
        fn on_closed(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingCaptureCallbacks {
        completed: AtomicUsize,
    }

    impl CaptureCallbacks for CountingCaptureCallbacks {
        fn on_completed(&self, _metadata: &CaptureMetadata) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_open_twice_is_in_use() {
        let adapter = SimAdapter::new(CameraDescriptor::default());
        let handle = adapter.open("0", Arc::new(NullDeviceCallbacks)).unwrap();
        assert!(matches!(
            adapter.open("0", Arc::new(NullDeviceCallbacks)),
            Err(AdapterError::InUse(_))
        ));

        drop(handle);
        assert!(adapter.open("0", Arc::new(NullDeviceCallbacks)).is_ok());
    }

    #[test]
    fn test_session_state_transitions() {
        let adapter = SimAdapter::new(CameraDescriptor::default());
        let mut device = adapter.open("0", Arc::new(NullDeviceCallbacks)).unwrap();
        let session_callbacks = CountingSessionCallbacks::new();

        let mut session = device
            .create_session(SessionOutputs::default(), session_callbacks.clone())
            .unwrap();
        assert_eq!(session_callbacks.ready.load(Ordering::SeqCst), 1);

        let mut request = device.create_request(RequestTemplate::ZeroShutterLag).unwrap();
        request.set_u8(ControlTag::AeMode, &[control_values::AE_MODE_ON]);

        session
            .set_repeating_request(
                request.as_ref(),
                Arc::new(CountingCaptureCallbacks {
                    completed: AtomicUsize::new(0),
                }),
            )
            .unwrap();
        assert_eq!(session_callbacks.active.load(Ordering::SeqCst), 1);

        session.stop_repeating().unwrap();
        assert_eq!(session_callbacks.ready.load(Ordering::SeqCst), 2);

        drop(session);
        assert_eq!(session_callbacks.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_repeating_frame_uses_manual_exposure() {
        let adapter = SimAdapter::new(CameraDescriptor::default());
        let mut device = adapter.open("0", Arc::new(NullDeviceCallbacks)).unwrap();
        let mut session = device
            .create_session(SessionOutputs::default(), CountingSessionCallbacks::new())
            .unwrap();

        let mut request = device.create_request(RequestTemplate::ZeroShutterLag).unwrap();
        request.set_u8(ControlTag::AeMode, &[control_values::AE_MODE_OFF]);
        request.set_i32(ControlTag::SensorSensitivity, &[800]);
        request.set_i64(ControlTag::SensorExposureTime, &[20_000_000]);

        let snapshot = snapshot_of(request.as_ref());
        let metadata = adapter.metadata_for(&snapshot, 42);
        assert_eq!(metadata.iso, 800);
        assert_eq!(metadata.exposure_time_ns, 20_000_000);
        assert_eq!(metadata.ae_state, CameraExposureState::Inactive);

        session
            .set_repeating_request(
                request.as_ref(),
                Arc::new(CountingCaptureCallbacks {
                    completed: AtomicUsize::new(0),
                }),
            )
            .unwrap();
        assert!(adapter.fire_repeating_frame().is_some());
    }

    #[test]
    fn test_reader_drops_oldest_beyond_depth() {
        let reader = SimImageReader {
            images: Mutex::new(VecDeque::new()),
            max_images: 2,
        };

        for ts in 1..=3 {
            reader.push(AcquiredImage {
                timestamp_ns: ts,
                width: 2,
                height: 1,
                row_stride: 4,
                pixel_format: RawPixelFormat::Raw16,
                data: vec![0; 4],
            });
        }

        assert_eq!(reader.acquire_latest_image().unwrap().timestamp_ns, 2);
        assert_eq!(reader.acquire_latest_image().unwrap().timestamp_ns, 3);
        assert!(reader.acquire_latest_image().is_none());
    }
}
