// SPDX-License-Identifier: GPL-3.0-only

//! Shared test harness: simulated camera, small pool, recording listener

#![allow(dead_code)]

use rawcam::adapter::sim::SimAdapter;
use rawcam::adapter::OutputConfiguration;
use rawcam::buffers::pool::RawBufferPool;
use rawcam::consumer::RawImageConsumer;
use rawcam::descriptor::CameraDescriptor;
use rawcam::session::listener::CameraSessionListener;
use rawcam::session::CameraSession;
use rawcam::types::{
    CameraExposureState, CameraFocusState, CameraSessionState, RawPixelFormat,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Everything a listener can report, recorded in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    State(CameraSessionState),
    Error(i32),
    Disconnected,
    ExposureStatus { iso: i32, exposure_time_ns: i64 },
    AeState(CameraExposureState),
    AfState(CameraFocusState),
    HdrProgress(f32),
    HdrCompleted,
    HdrFailed,
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn record(&self, event: ListenerEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn last_state(&self) -> Option<CameraSessionState> {
        self.events()
            .iter()
            .rev()
            .find_map(|e| match e {
                ListenerEvent::State(state) => Some(*state),
                _ => None,
            })
    }

    pub fn contains(&self, event: &ListenerEvent) -> bool {
        self.events().contains(event)
    }

    pub fn hdr_progress_values(&self) -> Vec<f32> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                ListenerEvent::HdrProgress(percent) => Some(*percent),
                _ => None,
            })
            .collect()
    }
}

impl CameraSessionListener for RecordingListener {
    fn on_camera_state_changed(&self, state: CameraSessionState) {
        self.record(ListenerEvent::State(state));
    }

    fn on_camera_error(&self, error: i32) {
        self.record(ListenerEvent::Error(error));
    }

    fn on_camera_disconnected(&self) {
        self.record(ListenerEvent::Disconnected);
    }

    fn on_camera_exposure_status(&self, iso: i32, exposure_time_ns: i64) {
        self.record(ListenerEvent::ExposureStatus {
            iso,
            exposure_time_ns,
        });
    }

    fn on_camera_auto_exposure_state_changed(&self, state: CameraExposureState) {
        self.record(ListenerEvent::AeState(state));
    }

    fn on_camera_auto_focus_state_changed(&self, state: CameraFocusState) {
        self.record(ListenerEvent::AfState(state));
    }

    fn on_camera_hdr_image_capture_progress(&self, percent: f32) {
        self.record(ListenerEvent::HdrProgress(percent));
    }

    fn on_camera_hdr_image_capture_completed(&self) {
        self.record(ListenerEvent::HdrCompleted);
    }

    fn on_camera_hdr_image_capture_failed(&self) {
        self.record(ListenerEvent::HdrFailed);
    }
}

pub struct Harness {
    pub adapter: Arc<SimAdapter>,
    pub pool: Arc<RawBufferPool>,
    pub listener: Arc<RecordingListener>,
    pub session: CameraSession,
    pub output: OutputConfiguration,
}

pub fn harness() -> Harness {
    harness_with(8, None)
}

pub fn harness_with(pool_buffers: usize, hdr_timeout: Option<Duration>) -> Harness {
    let descriptor = CameraDescriptor::default();
    let adapter = Arc::new(SimAdapter::new(descriptor.clone()));
    let pool = RawBufferPool::new();
    let listener = Arc::new(RecordingListener::default());

    let output = OutputConfiguration {
        width: 8,
        height: 4,
        format: RawPixelFormat::Raw16,
    };
    let consumer = Arc::new(RawImageConsumer::new(
        Arc::clone(&pool),
        output,
        pool_buffers,
    ));

    let mut session = CameraSession::new(
        Arc::clone(&adapter) as _,
        descriptor,
        Arc::clone(&listener) as _,
        consumer,
        Arc::clone(&pool),
    );
    if let Some(timeout) = hdr_timeout {
        session = session.with_hdr_timeout(timeout);
    }

    Harness {
        adapter,
        pool,
        listener,
        session,
        output,
    }
}

impl Harness {
    /// Open the camera and wait for the session to go active
    pub fn open_and_activate(&self) {
        self.session.open_camera(self.output, false);
        assert!(
            wait_until(|| self.listener.last_state() == Some(CameraSessionState::Active)),
            "session never became active"
        );
    }
}

/// Poll `predicate` until it holds or a 2 s deadline passes
pub fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}
