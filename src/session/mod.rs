// SPDX-License-Identifier: GPL-3.0-only

//! Capture session controller
//!
//! The controller presents an idempotent, non-blocking external API and
//! runs a single worker thread — the event loop — that owns every adapter
//! handle and every capture request. External calls and adapter callbacks
//! alike are translated into [`events::Event`]s; the loop processes them
//! strictly in arrival order, so no mutex guards the native objects.
//!
//! Callback threads are restricted to atomic reads of the orientation and
//! HDR flags, posting events, and feeding the image consumer. Session state
//! transitions are driven solely by the adapter's session callbacks.

pub mod events;
mod hdr;
pub mod listener;

use crate::adapter::{
    control_values, CaptureCallbacks, CaptureFailure, CaptureMetadata, CaptureRequestHandle,
    CaptureSessionHandle, CaptureTag, ControlTag, DeviceAdapter, DeviceHandle,
    DeviceStateCallbacks, ImageListener, ImageReaderHandle, OutputConfiguration, OutputTarget,
    RequestTemplate, SequenceId, SessionOutputs, SessionStateCallbacks,
};
use crate::buffers::pool::RawBufferPool;
use crate::constants::{hdr as hdr_constants, metering, EVENT_LOOP_POLL_INTERVAL,
    MAX_BUFFERED_RAW_IMAGES};
use crate::consumer::RawImageConsumer;
use crate::descriptor::CameraDescriptor;
use crate::errors::{SessionError, SessionResult};
use crate::settings::PostProcessSettings;
use crate::types::{
    CameraExposureState, CameraFocusState, CameraMode, CameraSessionState, RawType,
    ScreenOrientation,
};
use events::{get_bool, get_f64, get_i32, get_i64_str, i64_value, Event, EventAction};
use hdr::{HdrJob, HdrOutcome, PendingHdrSettings};
use listener::CameraSessionListener;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default ISO cached for manual exposure before the user sets one
const DEFAULT_USER_ISO: i32 = 100;
/// Default exposure time cached for manual exposure (10 ms)
const DEFAULT_USER_EXPOSURE_NS: i64 = 10_000_000;

/// Last values reported through the listener, used to emit change
/// notifications only when something moved.
struct LastReported {
    iso: i32,
    exposure_time_ns: i64,
    ae_state: CameraExposureState,
    af_state: CameraFocusState,
}

impl LastReported {
    fn initial() -> Self {
        Self {
            iso: 0,
            exposure_time_ns: 0,
            ae_state: CameraExposureState::Inactive,
            af_state: CameraFocusState::Inactive,
        }
    }
}

/// State shared between the event loop and adapter callback threads
struct SessionShared {
    orientation: AtomicU8,
    hdr_in_progress: AtomicBool,
    hdr_sequence_completed: AtomicBool,
    hdr_sequence_completed_at: Mutex<Option<Instant>>,
    hdr_pending: Mutex<Option<PendingHdrSettings>>,
    last_reported: Mutex<LastReported>,
}

impl SessionShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            orientation: AtomicU8::new(ScreenOrientation::Portrait.as_u8()),
            hdr_in_progress: AtomicBool::new(false),
            hdr_sequence_completed: AtomicBool::new(false),
            hdr_sequence_completed_at: Mutex::new(None),
            hdr_pending: Mutex::new(None),
            last_reported: Mutex::new(LastReported::initial()),
        })
    }

    fn orientation(&self) -> ScreenOrientation {
        ScreenOrientation::from_u8(self.orientation.load(Ordering::Relaxed))
    }

    fn reset_hdr(&self) {
        self.hdr_in_progress.store(false, Ordering::SeqCst);
        self.hdr_sequence_completed.store(false, Ordering::SeqCst);
        self.hdr_sequence_completed_at.lock().unwrap().take();
        self.hdr_pending.lock().unwrap().take();
    }
}

/// Clonable event-queue handle used by callback routers
#[derive(Clone)]
struct EventPoster {
    sender: Sender<Event>,
}

impl EventPoster {
    fn post(&self, action: EventAction) {
        self.post_event(Event::new(action));
    }

    fn post_with(&self, action: EventAction, data: serde_json::Value) {
        self.post_event(Event::with_data(action, data));
    }

    fn post_event(&self, event: Event) {
        if let Err(e) = self.sender.send(event) {
            debug!(event = ?e.0.action, "Event loop gone, dropping event");
        }
    }
}

/// Routes device-level callbacks into the event queue
struct DeviceRouter {
    events: EventPoster,
}

impl DeviceStateCallbacks for DeviceRouter {
    fn on_error(&self, error: i32) {
        error!(error, "Camera device reported an error");
        self.events
            .post_with(EventAction::CameraError, json!({ "error": error }));
    }

    fn on_disconnected(&self) {
        self.events.post(EventAction::CameraDisconnected);
    }
}

/// Routes session-state callbacks into the event queue
struct SessionStateRouter {
    events: EventPoster,
}

impl SessionStateRouter {
    fn post_state(&self, state: CameraSessionState) {
        self.events.post_with(
            EventAction::CameraSessionChanged,
            json!({ "state": state.as_i32() }),
        );
    }
}

impl SessionStateCallbacks for SessionStateRouter {
    fn on_active(&self) {
        self.post_state(CameraSessionState::Active);
    }

    fn on_ready(&self) {
        self.post_state(CameraSessionState::Ready);
    }

    fn on_closed(&self) {
        self.post_state(CameraSessionState::Closed);
    }
}

/// Routes per-capture callbacks for one capture subject.
///
/// One router exists per [`CaptureTag`]; the set is owned by the session
/// context and torn down only after the capture session and device handle
/// are released, so a late adapter callback never dangles.
struct CaptureRouter {
    tag: CaptureTag,
    events: EventPoster,
    shared: Arc<SessionShared>,
    consumer: Arc<RawImageConsumer>,
}

impl CaptureCallbacks for CaptureRouter {
    fn on_completed(&self, metadata: &CaptureMetadata) {
        match self.tag {
            CaptureTag::Repeat => {
                self.consumer
                    .queue_metadata(metadata, self.shared.orientation(), RawType::Zsl);
            }
            CaptureTag::HdrCapture => {
                self.consumer
                    .queue_metadata(metadata, self.shared.orientation(), RawType::Hdr);
            }
            CaptureTag::TriggerAf => {
                info!("AF trigger completed");
                self.events.post(EventAction::CameraTriggerAfCompleted);
            }
            CaptureTag::CancelAf => {
                info!("AF trigger cancelled");
            }
        }

        let mut last = self.shared.last_reported.lock().unwrap();

        if metadata.iso != last.iso || metadata.exposure_time_ns != last.exposure_time_ns {
            last.iso = metadata.iso;
            last.exposure_time_ns = metadata.exposure_time_ns;
            self.events.post_with(
                EventAction::CameraExposureStatusChanged,
                json!({
                    "iso": metadata.iso,
                    "exposureTime": i64_value(metadata.exposure_time_ns),
                }),
            );
        }

        if metadata.af_state != last.af_state {
            last.af_state = metadata.af_state;
            self.events.post_with(
                EventAction::CameraAutoFocusStateChanged,
                json!({ "state": metadata.af_state.as_i32() }),
            );
        }

        if metadata.ae_state != last.ae_state {
            last.ae_state = metadata.ae_state;
            self.events.post_with(
                EventAction::CameraAutoExposureStateChanged,
                json!({ "state": metadata.ae_state.as_i32() }),
            );
        }
    }

    fn on_failed(&self, failure: &CaptureFailure) {
        if self.tag == CaptureTag::TriggerAf {
            // The user retries by tapping again
            error!(reason = %failure.reason, "AF trigger capture failed");
        } else {
            warn!(
                tag = ?self.tag,
                frame = failure.frame_number,
                reason = %failure.reason,
                "Capture failed"
            );
        }
    }

    fn on_buffer_lost(&self, frame_number: i64) {
        warn!(tag = ?self.tag, frame = frame_number, "Capture buffer lost");
    }

    fn on_sequence_completed(&self, sequence_id: SequenceId, _last_frame_number: i64) {
        if self.tag == CaptureTag::HdrCapture {
            info!(sequence = sequence_id, "HDR capture sequence completed");
            self.mark_hdr_sequence_done();
        }
    }

    fn on_sequence_aborted(&self, sequence_id: SequenceId) {
        if self.tag == CaptureTag::HdrCapture {
            info!(sequence = sequence_id, "HDR capture sequence aborted");
            self.mark_hdr_sequence_done();
        }
    }
}

impl CaptureRouter {
    fn mark_hdr_sequence_done(&self) {
        *self.shared.hdr_sequence_completed_at.lock().unwrap() = Some(Instant::now());
        self.shared
            .hdr_sequence_completed
            .store(true, Ordering::SeqCst);
    }
}

/// Drains the image reader on the adapter's reader thread
struct ImageRouter {
    events: EventPoster,
    shared: Arc<SessionShared>,
    consumer: Arc<RawImageConsumer>,
}

impl ImageListener for ImageRouter {
    fn on_image_available(&self, reader: &dyn ImageReaderHandle) {
        while let Some(image) = reader.acquire_latest_image() {
            self.consumer.queue_image(image);
        }

        if self.shared.hdr_in_progress.load(Ordering::SeqCst) {
            self.events.post(EventAction::SaveHdrData);
        }
    }
}

/// Native handles owned by the event loop while a camera is open.
///
/// Field order is teardown order: the capture session is released before
/// the device, the device before the reader, and the callback routers
/// outlive all of them.
struct SessionContext {
    session: Box<dyn CaptureSessionHandle>,
    device: Box<dyn DeviceHandle>,
    reader: Option<Box<dyn ImageReaderHandle>>,
    repeat_request: Box<dyn CaptureRequestHandle>,
    hdr_requests: [Box<dyn CaptureRequestHandle>; 2],
    capture_callbacks: BTreeMap<CaptureTag, Arc<CaptureRouter>>,
    has_preview_target: bool,
}

struct EventLoop {
    adapter: Arc<dyn DeviceAdapter>,
    descriptor: Arc<CameraDescriptor>,
    listener: Arc<dyn CameraSessionListener>,
    consumer: Arc<RawImageConsumer>,
    pool: Arc<RawBufferPool>,
    shared: Arc<SessionShared>,
    events: EventPoster,
    receiver: Receiver<Event>,
    output_config: OutputConfiguration,
    hdr_timeout: Duration,

    state: CameraSessionState,
    mode: CameraMode,
    user_iso: i32,
    user_exposure_time_ns: i64,
    exposure_compensation: i32,
    hdr: HdrJob,
    context: Option<SessionContext>,
}

impl EventLoop {
    fn run(mut self) {
        debug!("Session event loop started");
        let mut received_stop = false;

        loop {
            match self.receiver.recv_timeout(EVENT_LOOP_POLL_INTERVAL) {
                Ok(event) => {
                    if event.action == EventAction::Stop {
                        received_stop = true;
                        continue;
                    }

                    if let Err(e) = self.process(&event) {
                        // Errors never escape the loop: report and close
                        error!(error = %e, event = ?event.action, "Event handler failed");
                        self.listener.on_camera_error(e.code());
                        self.events.post(EventAction::CloseCamera);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.check_hdr_deadline();

                    // Late adapter callbacks must not land on a dead loop:
                    // exit only once the camera is closed.
                    if received_stop && self.state == CameraSessionState::Closed {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("Session event loop exiting");
    }

    fn process(&mut self, event: &Event) -> SessionResult<()> {
        match event.action {
            EventAction::OpenCamera => {
                self.do_open_camera(get_bool(&event.data, "setupForRawPreview"))
            }
            EventAction::CloseCamera => {
                self.do_close_camera();
                Ok(())
            }
            EventAction::PauseCapture => self.do_pause_capture(),
            EventAction::ResumeCapture => self.do_resume_capture(),
            EventAction::SetAutoExposure => self.do_set_auto_exposure(),
            EventAction::SetManualExposure => self.do_set_manual_exposure(
                get_i32(&event.data, "iso"),
                get_i64_str(&event.data, "exposureTime"),
            ),
            EventAction::SetExposureCompensation => {
                self.do_set_exposure_compensation(get_f64(&event.data, "value") as f32)
            }
            EventAction::SetAutoFocus => self.do_set_auto_focus(),
            EventAction::SetFocusPoint => self.do_set_focus_point(
                get_f64(&event.data, "focusX"),
                get_f64(&event.data, "focusY"),
                get_f64(&event.data, "exposureX"),
                get_f64(&event.data, "exposureY"),
            ),
            EventAction::CaptureHdr => self.do_capture_hdr(
                get_i32(&event.data, "numImages"),
                get_i32(&event.data, "baseIso"),
                get_i64_str(&event.data, "baseExposure"),
                get_i32(&event.data, "hdrIso"),
                get_i64_str(&event.data, "hdrExposure"),
            ),
            EventAction::SaveHdrData => {
                self.do_attempt_save_hdr();
                Ok(())
            }
            EventAction::CameraError => {
                let code = get_i32(&event.data, "error");
                error!(error = code, "Camera error, closing session");
                self.listener.on_camera_error(code);
                self.events.post(EventAction::CloseCamera);
                Ok(())
            }
            EventAction::CameraDisconnected => {
                info!("Camera disconnected, closing session");
                self.listener.on_camera_disconnected();
                self.events.post(EventAction::CloseCamera);
                Ok(())
            }
            EventAction::CameraSessionChanged => {
                let state = CameraSessionState::from_i32(get_i32(&event.data, "state"));
                info!(state = ?state, "Camera session state changed");
                self.state = state;
                self.listener.on_camera_state_changed(state);
                Ok(())
            }
            EventAction::CameraExposureStatusChanged => {
                self.listener.on_camera_exposure_status(
                    get_i32(&event.data, "iso"),
                    get_i64_str(&event.data, "exposureTime"),
                );
                Ok(())
            }
            EventAction::CameraAutoExposureStateChanged => {
                self.listener.on_camera_auto_exposure_state_changed(
                    CameraExposureState::from_i32(get_i32(&event.data, "state")),
                );
                Ok(())
            }
            EventAction::CameraAutoFocusStateChanged => {
                self.listener.on_camera_auto_focus_state_changed(
                    CameraFocusState::from_i32(get_i32(&event.data, "state")),
                );
                Ok(())
            }
            EventAction::CameraTriggerAfCompleted => self.do_trigger_af_completed(),
            EventAction::Stop => Ok(()),
        }
    }

    fn do_open_camera(&mut self, setup_for_raw_preview: bool) -> SessionResult<()> {
        if self.state != CameraSessionState::Closed || self.context.is_some() {
            error!("Trying to open camera that isn't closed");
            return Ok(());
        }

        info!(device = %self.descriptor.id, raw_preview = setup_for_raw_preview, "Opening camera");

        let mut device = self.adapter.open(
            &self.descriptor.id,
            Arc::new(DeviceRouter {
                events: self.events.clone(),
            }),
        )?;

        // One repeating request for the ZSL stream, two for HDR brackets
        let mut repeat_request = self.build_template_request(&mut *device)?;
        let mut hdr_requests = [
            self.build_template_request(&mut *device)?,
            self.build_template_request(&mut *device)?,
        ];

        // With a raw preview the downstream processor renders from pool
        // buffers, so the preview surface is not a repeating target.
        let has_preview_target = !setup_for_raw_preview;
        if has_preview_target {
            repeat_request.add_target(OutputTarget::Preview);
        }

        let image_router = Arc::new(ImageRouter {
            events: self.events.clone(),
            shared: Arc::clone(&self.shared),
            consumer: Arc::clone(&self.consumer),
        });

        let reader = device
            .create_image_reader(self.output_config, MAX_BUFFERED_RAW_IMAGES, image_router)
            .map_err(|e| SessionError::SessionCreate(e.to_string()))?;

        repeat_request.add_target(OutputTarget::RawReader);
        for request in &mut hdr_requests {
            request.add_target(OutputTarget::RawReader);
        }

        let session = device
            .create_session(
                SessionOutputs {
                    preview: true,
                    raw_reader: true,
                },
                Arc::new(SessionStateRouter {
                    events: self.events.clone(),
                }),
            )
            .map_err(|e| SessionError::SessionCreate(e.to_string()))?;

        self.consumer.start();

        let mut capture_callbacks = BTreeMap::new();
        for tag in [
            CaptureTag::Repeat,
            CaptureTag::TriggerAf,
            CaptureTag::CancelAf,
            CaptureTag::HdrCapture,
        ] {
            capture_callbacks.insert(
                tag,
                Arc::new(CaptureRouter {
                    tag,
                    events: self.events.clone(),
                    shared: Arc::clone(&self.shared),
                    consumer: Arc::clone(&self.consumer),
                }),
            );
        }

        self.context = Some(SessionContext {
            session,
            device,
            reader: Some(reader),
            repeat_request,
            hdr_requests,
            capture_callbacks,
            has_preview_target,
        });

        info!("Starting capture");
        self.do_repeat_capture()
    }

    fn do_close_camera(&mut self) {
        {
            let Some(mut context) = self.context.take() else {
                debug!("Close requested but no session is open");
                return;
            };

            debug!("Closing capture session");
            drop(context.session);

            debug!("Closing camera device");
            drop(context.device);

            debug!("Closing image reader");
            context.reader.take();

            if context.has_preview_target {
                context.repeat_request.remove_target(OutputTarget::Preview);
            }
            context.repeat_request.remove_target(OutputTarget::RawReader);
            for request in &mut context.hdr_requests {
                request.remove_target(OutputTarget::RawReader);
            }

            // Requests and callback routers drop at the end of this scope,
            // after the session and device are gone.
        }

        debug!("Stopping image consumer");
        self.consumer.stop();

        self.shared.reset_hdr();
        self.hdr.reset();
    }

    fn build_template_request(
        &self,
        device: &mut dyn DeviceHandle,
    ) -> SessionResult<Box<dyn CaptureRequestHandle>> {
        let mut request = device
            .create_request(RequestTemplate::ZeroShutterLag)
            .map_err(|e| SessionError::RequestBuild(e.to_string()))?;

        request.set_u8(
            ControlTag::CaptureIntent,
            &[control_values::CAPTURE_INTENT_ZERO_SHUTTER_LAG],
        );
        request.set_u8(ControlTag::ControlMode, &[control_values::CONTROL_MODE_AUTO]);
        request.set_u8(ControlTag::TonemapMode, &[control_values::TONEMAP_MODE_FAST]);
        request.set_u8(ControlTag::ShadingMode, &[control_values::SHADING_MODE_FAST]);
        request.set_u8(
            ControlTag::ColorCorrectionMode,
            &[control_values::COLOR_CORRECTION_MODE_HIGH_QUALITY],
        );
        request.set_u8(
            ControlTag::LensShadingMapStatsMode,
            &[control_values::LENS_SHADING_MAP_STATS_ON],
        );
        request.set_u8(
            ControlTag::LensShadingApplied,
            &[control_values::LENS_SHADING_APPLIED_FALSE],
        );
        request.set_u8(
            ControlTag::AntiBandingMode,
            &[control_values::ANTIBANDING_MODE_AUTO],
        );
        request.set_u8(
            ControlTag::NoiseReductionMode,
            &[control_values::NOISE_REDUCTION_MODE_FAST],
        );

        if self.descriptor.supports_ois() {
            debug!("Enabling OIS");
            request.set_u8(ControlTag::OisMode, &[control_values::OIS_MODE_ON]);
        }

        request.set_u8(ControlTag::AeMode, &[control_values::AE_MODE_ON]);
        request.set_u8(
            ControlTag::AfMode,
            &[control_values::AF_MODE_CONTINUOUS_PICTURE],
        );
        request.set_u8(ControlTag::AwbMode, &[control_values::AWB_MODE_AUTO]);
        request.set_u8(ControlTag::AfTrigger, &[control_values::TRIGGER_IDLE]);
        request.set_u8(
            ControlTag::AePrecaptureTrigger,
            &[control_values::TRIGGER_IDLE],
        );

        Ok(request)
    }

    /// Rebuild and resubmit the repeating request for the current mode
    fn do_repeat_capture(&mut self) -> SessionResult<()> {
        let mode = self.mode;
        let compensation = self.exposure_compensation;
        let iso = self.user_iso;
        let exposure_time_ns = self.user_exposure_time_ns;

        let Some(context) = self.context.as_mut() else {
            return Err(SessionError::Internal(
                "No session for repeating request".to_string(),
            ));
        };

        let request = &mut context.repeat_request;
        match mode {
            CameraMode::Auto => {
                request.set_u8(ControlTag::AeMode, &[control_values::AE_MODE_ON]);
                request.set_u8(
                    ControlTag::AfMode,
                    &[control_values::AF_MODE_CONTINUOUS_PICTURE],
                );
                request.set_i32(ControlTag::AeExposureCompensation, &[compensation]);
                request.clear(ControlTag::SensorSensitivity);
                request.clear(ControlTag::SensorExposureTime);
                request.clear(ControlTag::AfTrigger);
                request.clear(ControlTag::AfRegions);
                request.clear(ControlTag::AeRegions);
            }
            CameraMode::Manual => {
                request.set_u8(ControlTag::AeMode, &[control_values::AE_MODE_OFF]);
                request.set_i32(ControlTag::SensorSensitivity, &[iso]);
                request.set_i64(ControlTag::SensorExposureTime, &[exposure_time_ns]);
                request.clear(ControlTag::AeExposureCompensation);
            }
        }

        let callbacks: Arc<dyn CaptureCallbacks> =
            Arc::clone(&context.capture_callbacks[&CaptureTag::Repeat]) as _;
        context
            .session
            .set_repeating_request(context.repeat_request.as_ref(), callbacks)
            .map_err(|e| SessionError::RequestBuild(e.to_string()))?;

        Ok(())
    }

    fn do_pause_capture(&mut self) -> SessionResult<()> {
        if self.state != CameraSessionState::Active {
            warn!(state = ?self.state, "Cannot pause capture, invalid state");
            return Ok(());
        }

        let Some(context) = self.context.as_mut() else {
            return Ok(());
        };

        context
            .session
            .stop_repeating()
            .map_err(|e| SessionError::Internal(e.to_string()))
    }

    fn do_resume_capture(&mut self) -> SessionResult<()> {
        if self.state != CameraSessionState::Ready {
            warn!(state = ?self.state, "Cannot resume capture, invalid state");
            return Ok(());
        }

        self.do_repeat_capture()
    }

    fn do_set_auto_exposure(&mut self) -> SessionResult<()> {
        if self.state != CameraSessionState::Active {
            warn!(state = ?self.state, "Cannot set auto exposure, invalid state");
            return Ok(());
        }

        self.mode = CameraMode::Auto;
        self.exposure_compensation = 0;
        self.do_repeat_capture()
    }

    fn do_set_manual_exposure(&mut self, iso: i32, exposure_time_ns: i64) -> SessionResult<()> {
        if self.state != CameraSessionState::Active {
            warn!(state = ?self.state, "Cannot set manual exposure, invalid state");
            return Ok(());
        }

        self.mode = CameraMode::Manual;
        self.exposure_compensation = 0;
        self.user_iso = iso;
        self.user_exposure_time_ns = exposure_time_ns;
        self.do_repeat_capture()
    }

    fn do_set_exposure_compensation(&mut self, value: f32) -> SessionResult<()> {
        if self.state != CameraSessionState::Active {
            warn!(state = ?self.state, "Cannot set exposure compensation, invalid state");
            return Ok(());
        }

        let compensation =
            map_exposure_compensation(value, self.descriptor.exposure_compensation_range);
        if compensation == self.exposure_compensation {
            return Ok(());
        }

        info!(compensation, "Updating exposure compensation");
        self.exposure_compensation = compensation;
        self.do_repeat_capture()
    }

    fn do_set_focus_point(
        &mut self,
        focus_x: f64,
        focus_y: f64,
        exposure_x: f64,
        exposure_y: f64,
    ) -> SessionResult<()> {
        if self.state != CameraSessionState::Active {
            warn!(state = ?self.state, "Cannot set focus point, invalid state");
            return Ok(());
        }

        if self.descriptor.max_af_regions <= 0 {
            info!("Cannot set focus point, device has no AF regions");
            return Ok(());
        }

        let active_array = self.descriptor.sensor_active_array;
        let supports_ae_region = self.descriptor.max_ae_regions > 0;

        let Some(context) = self.context.as_mut() else {
            return Ok(());
        };

        // Discard whatever is in flight so the trigger frame is next
        if let Err(e) = context.session.abort_captures() {
            warn!(error = %e, "Failed to abort in-flight captures");
        }

        let request = &mut context.repeat_request;
        request.set_u8(ControlTag::AfMode, &[control_values::AF_MODE_AUTO]);
        request.set_u8(ControlTag::AfTrigger, &[control_values::TRIGGER_START]);

        let af_region = metering_region(active_array, focus_x, focus_y);
        request.set_i32(ControlTag::AfRegions, &af_region);

        if supports_ae_region {
            let ae_region = metering_region(active_array, exposure_x, exposure_y);
            request.set_i32(ControlTag::AeRegions, &ae_region);
            request.set_u8(
                ControlTag::AePrecaptureTrigger,
                &[control_values::TRIGGER_START],
            );
        }

        let callbacks: Arc<dyn CaptureCallbacks> =
            Arc::clone(&context.capture_callbacks[&CaptureTag::TriggerAf]) as _;
        context
            .session
            .capture(&[context.repeat_request.as_ref()], callbacks)
            .map_err(|_| SessionError::RequestBuild("Failed to set auto focus point".to_string()))?;

        Ok(())
    }

    fn do_set_auto_focus(&mut self) -> SessionResult<()> {
        if self.state != CameraSessionState::Active {
            warn!(state = ?self.state, "Cannot set auto focus, invalid state");
            return Ok(());
        }

        info!("Setting auto focus");
        self.do_repeat_capture()
    }

    /// The AF trigger one-shot completed: clear the triggers and hand the
    /// stream back to the repeating request.
    fn do_trigger_af_completed(&mut self) -> SessionResult<()> {
        let Some(context) = self.context.as_mut() else {
            return Ok(());
        };

        let request = &mut context.repeat_request;
        request.set_u8(ControlTag::AfMode, &[control_values::AF_MODE_AUTO]);
        request.set_u8(ControlTag::AfTrigger, &[control_values::TRIGGER_IDLE]);
        request.set_u8(
            ControlTag::AePrecaptureTrigger,
            &[control_values::TRIGGER_IDLE],
        );

        let callbacks: Arc<dyn CaptureCallbacks> =
            Arc::clone(&context.capture_callbacks[&CaptureTag::Repeat]) as _;
        if let Err(e) = context
            .session
            .set_repeating_request(context.repeat_request.as_ref(), callbacks)
        {
            error!(error = %e, "Failed to restore repeating request after AF trigger");
            self.events.post(EventAction::CloseCamera);
        }

        Ok(())
    }

    fn do_capture_hdr(
        &mut self,
        num_images: i32,
        base_iso: i32,
        base_exposure_ns: i64,
        hdr_iso: i32,
        hdr_exposure_ns: i64,
    ) -> SessionResult<()> {
        if num_images < 1 {
            error!(num_images, "Invalid HDR capture requested");
            self.shared.reset_hdr();
            return Ok(());
        }

        let pending = self
            .shared
            .hdr_pending
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| {
                warn!("HDR capture without pending settings, using defaults");
                PendingHdrSettings {
                    settings: PostProcessSettings::default(),
                    output_path: PathBuf::new(),
                }
            });

        let Some(context) = self.context.as_mut() else {
            warn!("Cannot capture HDR, no session");
            self.shared.reset_hdr();
            return Ok(());
        };

        // Brackets are always manually exposed, whatever the current mode
        let base = &mut context.hdr_requests[0];
        base.set_u8(ControlTag::AeMode, &[control_values::AE_MODE_OFF]);
        base.set_i32(ControlTag::SensorSensitivity, &[base_iso]);
        base.set_i64(ControlTag::SensorExposureTime, &[base_exposure_ns]);

        let underexposed = &mut context.hdr_requests[1];
        underexposed.set_u8(ControlTag::AeMode, &[control_values::AE_MODE_OFF]);
        underexposed.set_i32(ControlTag::SensorSensitivity, &[hdr_iso]);
        underexposed.set_i64(ControlTag::SensorExposureTime, &[hdr_exposure_ns]);

        // One extra frame so at least N base exposures arrive alongside the
        // single darker frame interleaved near the middle.
        let total = num_images as usize + 1;
        let mut requests: Vec<&dyn CaptureRequestHandle> = Vec::with_capacity(total);
        for _ in 0..total {
            requests.push(context.hdr_requests[0].as_ref());
        }
        requests[total / 2] = context.hdr_requests[1].as_ref();

        info!(
            num_images = total,
            base_iso,
            base_exposure_ns,
            hdr_iso,
            hdr_exposure_ns,
            "Initiating HDR capture"
        );

        self.hdr.arm(total, pending);

        let callbacks: Arc<dyn CaptureCallbacks> =
            Arc::clone(&context.capture_callbacks[&CaptureTag::HdrCapture]) as _;
        match context.session.capture(&requests, callbacks) {
            Ok(sequence_id) => {
                debug!(sequence = sequence_id, "HDR burst submitted");
                self.hdr.mark_submitted();
            }
            Err(e) => {
                error!(error = %e, "Failed to submit HDR burst");
                self.shared.reset_hdr();
                self.hdr.reset();
            }
        }

        Ok(())
    }

    fn do_attempt_save_hdr(&mut self) {
        if !self.shared.hdr_in_progress.load(Ordering::SeqCst) {
            debug!("Stale HDR save event");
            return;
        }

        let have = self.pool.num_hdr_buffers();
        let completed_at = *self.shared.hdr_sequence_completed_at.lock().unwrap();
        if self.shared.hdr_sequence_completed.load(Ordering::SeqCst) {
            self.hdr.mark_sequence_completed();
        }

        match self
            .hdr
            .evaluate(have, completed_at, self.hdr_timeout, Instant::now())
        {
            HdrOutcome::NotInProgress => {}
            HdrOutcome::Progress(percent) => {
                self.listener.on_camera_hdr_image_capture_progress(percent);
            }
            HdrOutcome::TimedOut => self.fail_hdr_capture(have),
            HdrOutcome::Complete => {
                self.listener.on_camera_hdr_image_capture_progress(100.0);
                self.shared.reset_hdr();

                info!(frames = have, "HDR capture completed, saving data");
                let result = self.pool.drain_hdr_to_container(
                    &self.descriptor,
                    self.hdr.settings(),
                    self.hdr.output_path(),
                );

                match result {
                    Ok(()) => self.listener.on_camera_hdr_image_capture_completed(),
                    Err(e) => {
                        error!(error = %e, "Failed to save HDR container");
                        self.listener.on_camera_hdr_image_capture_failed();
                    }
                }

                self.hdr.reset();
            }
        }
    }

    /// Timeout backstop for the case where the sequence completed but the
    /// trailing frames never show up to post further save events.
    fn check_hdr_deadline(&mut self) {
        if !self.shared.hdr_in_progress.load(Ordering::SeqCst)
            || !self.shared.hdr_sequence_completed.load(Ordering::SeqCst)
        {
            return;
        }

        let have = self.pool.num_hdr_buffers();
        let completed_at = *self.shared.hdr_sequence_completed_at.lock().unwrap();
        self.hdr.mark_sequence_completed();

        match self
            .hdr
            .evaluate(have, completed_at, self.hdr_timeout, Instant::now())
        {
            HdrOutcome::TimedOut => self.fail_hdr_capture(have),
            HdrOutcome::Complete => self.do_attempt_save_hdr(),
            _ => {}
        }
    }

    fn fail_hdr_capture(&mut self, have: usize) {
        warn!(
            have,
            want = self.hdr.requested_frames(),
            "HDR capture timed out waiting for frames"
        );

        self.shared.reset_hdr();
        self.hdr.reset();
        self.listener.on_camera_hdr_image_capture_failed();
    }
}

/// Map normalized [0, 1] exposure compensation onto the device's range
fn map_exposure_compensation(value: f32, range: [i32; 2]) -> i32 {
    let value = value.clamp(0.0, 1.0);
    let span = (range[1] - range[0]) as f64;
    (f64::from(value) * span) as i32 + range[0]
}

/// Build a weighted metering rectangle centered on a normalized point
/// mapped into the sensor active array.
fn metering_region(active_array: [i32; 4], x: f64, y: f64) -> [i32; 5] {
    let x = x.clamp(0.0, 1.0);
    let y = y.clamp(0.0, 1.0);

    let half = metering::REGION_SIDE / 2;
    let px = active_array[0] + (active_array[2] as f64 * x) as i32;
    let py = active_array[1] + (active_array[3] as f64 * y) as i32;

    [
        px - half,
        py - half,
        px + half,
        py + half,
        metering::REGION_WEIGHT,
    ]
}

struct SessionThread {
    sender: Sender<Event>,
    handle: JoinHandle<()>,
}

/// Top-level capture session controller.
///
/// Every method except [`CameraSession::close_camera`] posts an event and
/// returns immediately; `close_camera` blocks until the event loop joins,
/// after which no callback has any observable effect.
pub struct CameraSession {
    adapter: Arc<dyn DeviceAdapter>,
    descriptor: Arc<CameraDescriptor>,
    listener: Arc<dyn CameraSessionListener>,
    consumer: Arc<RawImageConsumer>,
    pool: Arc<RawBufferPool>,
    shared: Arc<SessionShared>,
    hdr_timeout: Duration,
    inner: Mutex<Option<SessionThread>>,
}

impl CameraSession {
    pub fn new(
        adapter: Arc<dyn DeviceAdapter>,
        descriptor: CameraDescriptor,
        listener: Arc<dyn CameraSessionListener>,
        consumer: Arc<RawImageConsumer>,
        pool: Arc<RawBufferPool>,
    ) -> Self {
        Self {
            adapter,
            descriptor: Arc::new(descriptor),
            listener,
            consumer,
            pool,
            shared: SessionShared::new(),
            hdr_timeout: hdr_constants::SEQUENCE_TIMEOUT,
            inner: Mutex::new(None),
        }
    }

    /// Override the HDR post-sequence timeout. Call before `open_camera`.
    pub fn with_hdr_timeout(mut self, timeout: Duration) -> Self {
        self.hdr_timeout = timeout;
        self
    }

    /// Start the event loop and open the camera.
    ///
    /// With `setup_for_raw_preview` the preview surface is left out of the
    /// repeating request and the downstream processor renders the preview
    /// from pool buffers.
    pub fn open_camera(&self, output_config: OutputConfiguration, setup_for_raw_preview: bool) {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_some() {
            error!("Trying to open camera while already running");
            return;
        }

        self.shared.reset_hdr();
        *self.shared.last_reported.lock().unwrap() = LastReported::initial();

        let (sender, receiver) = mpsc::channel::<Event>();

        let event_loop = EventLoop {
            adapter: Arc::clone(&self.adapter),
            descriptor: Arc::clone(&self.descriptor),
            listener: Arc::clone(&self.listener),
            consumer: Arc::clone(&self.consumer),
            pool: Arc::clone(&self.pool),
            shared: Arc::clone(&self.shared),
            events: EventPoster {
                sender: sender.clone(),
            },
            receiver,
            output_config,
            hdr_timeout: self.hdr_timeout,
            state: CameraSessionState::Closed,
            mode: CameraMode::Auto,
            user_iso: DEFAULT_USER_ISO,
            user_exposure_time_ns: DEFAULT_USER_EXPOSURE_NS,
            exposure_compensation: 0,
            hdr: HdrJob::idle(),
            context: None,
        };

        let handle = std::thread::spawn(move || event_loop.run());

        let _ = sender.send(Event::with_data(
            EventAction::OpenCamera,
            json!({ "setupForRawPreview": setup_for_raw_preview }),
        ));

        *inner = Some(SessionThread { sender, handle });
    }

    /// Close the camera and join the event loop. Safe to call repeatedly;
    /// with no session open it returns immediately.
    pub fn close_camera(&self) {
        let thread = self.inner.lock().unwrap().take();
        let Some(thread) = thread else {
            debug!("Close requested but no session is running");
            return;
        };

        let _ = thread.sender.send(Event::new(EventAction::CloseCamera));
        let _ = thread.sender.send(Event::new(EventAction::Stop));

        if thread.handle.join().is_err() {
            error!("Session event loop panicked");
        }
    }

    pub fn pause_capture(&self) {
        self.post(Event::new(EventAction::PauseCapture));
    }

    pub fn resume_capture(&self) {
        self.post(Event::new(EventAction::ResumeCapture));
    }

    pub fn set_auto_exposure(&self) {
        self.post(Event::new(EventAction::SetAutoExposure));
    }

    pub fn set_manual_exposure(&self, iso: i32, exposure_time_ns: i64) {
        self.post(Event::with_data(
            EventAction::SetManualExposure,
            json!({ "iso": iso, "exposureTime": i64_value(exposure_time_ns) }),
        ));
    }

    /// Exposure compensation as a normalized [0, 1] value mapped onto the
    /// device's compensation range. Out-of-range input is clamped.
    pub fn set_exposure_compensation(&self, value: f32) {
        self.post(Event::with_data(
            EventAction::SetExposureCompensation,
            json!({ "value": value }),
        ));
    }

    /// Focus and exposure metering points in normalized [0, 1] viewport
    /// coordinates. Out-of-range input is clamped.
    pub fn set_focus_point(&self, focus_x: f32, focus_y: f32, exposure_x: f32, exposure_y: f32) {
        self.post(Event::with_data(
            EventAction::SetFocusPoint,
            json!({
                "focusX": focus_x,
                "focusY": focus_y,
                "exposureX": exposure_x,
                "exposureY": exposure_y,
            }),
        ));
    }

    pub fn set_auto_focus(&self) {
        self.post(Event::new(EventAction::SetAutoFocus));
    }

    /// Start a bracketed HDR capture of `num_images` base frames plus one
    /// underexposed frame. Rejected while a capture is already in flight.
    #[allow(clippy::too_many_arguments)]
    pub fn capture_hdr(
        &self,
        num_images: i32,
        base_iso: i32,
        base_exposure_ns: i64,
        hdr_iso: i32,
        hdr_exposure_ns: i64,
        settings: PostProcessSettings,
        output_path: PathBuf,
    ) {
        if num_images < 1 {
            error!(num_images, "Invalid HDR capture requested");
            return;
        }

        if self.shared.hdr_in_progress.swap(true, Ordering::SeqCst) {
            warn!("HDR capture already in progress, ignoring request");
            return;
        }

        self.shared
            .hdr_sequence_completed
            .store(false, Ordering::SeqCst);
        self.shared.hdr_sequence_completed_at.lock().unwrap().take();
        *self.shared.hdr_pending.lock().unwrap() = Some(PendingHdrSettings {
            settings,
            output_path,
        });

        if !self.post(Event::with_data(
            EventAction::CaptureHdr,
            json!({
                "numImages": num_images,
                "baseIso": base_iso,
                "baseExposure": i64_value(base_exposure_ns),
                "hdrIso": hdr_iso,
                "hdrExposure": i64_value(hdr_exposure_ns),
            }),
        )) {
            self.shared.reset_hdr();
        }
    }

    /// Record the current screen orientation for frame metadata. Atomic
    /// write; does not go through the event queue.
    pub fn update_orientation(&self, orientation: ScreenOrientation) {
        self.shared
            .orientation
            .store(orientation.as_u8(), Ordering::Relaxed);
    }

    fn post(&self, event: Event) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.as_ref() {
            Some(thread) => thread.sender.send(event).is_ok(),
            None => {
                warn!("Failed to queue event, event loop is gone");
                false
            }
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.close_camera();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposure_compensation_mapping() {
        let range = [-24, 24];
        assert_eq!(map_exposure_compensation(0.0, range), -24);
        assert_eq!(map_exposure_compensation(0.5, range), 0);
        assert_eq!(map_exposure_compensation(1.0, range), 24);
    }

    #[test]
    fn test_exposure_compensation_clamps_input() {
        let range = [-12, 12];
        assert_eq!(map_exposure_compensation(-3.0, range), -12);
        assert_eq!(map_exposure_compensation(7.5, range), 12);
    }

    #[test]
    fn test_metering_region_centered() {
        let region = metering_region([0, 0, 4000, 3000], 0.5, 0.5);
        assert_eq!(region, [1900, 1400, 2100, 1600, 1000]);
    }

    #[test]
    fn test_metering_region_clamps_coordinates() {
        let region = metering_region([0, 0, 4000, 3000], -1.0, 2.0);
        assert_eq!(region, [-100, 2900, 100, 3100, 1000]);
    }

    #[test]
    fn test_metering_region_offset_array() {
        let region = metering_region([100, 200, 1000, 1000], 0.0, 0.0);
        assert_eq!(region[0], 0);
        assert_eq!(region[1], 100);
    }
}
