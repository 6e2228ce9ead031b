// SPDX-License-Identifier: GPL-3.0-only

//! Host-facing session listener

use crate::types::{CameraExposureState, CameraFocusState, CameraSessionState};

/// Notifications fired by the session controller.
///
/// All callbacks run on the session's event-loop thread; implementations
/// must not call back into the session synchronously and should hand off
/// heavy work.
#[allow(unused_variables)]
pub trait CameraSessionListener: Send + Sync {
    /// Session state transition, as reported by the device adapter
    fn on_camera_state_changed(&self, state: CameraSessionState);

    /// Fatal device error. A close follows automatically.
    fn on_camera_error(&self, error: i32);

    /// Device disconnected. A close follows automatically.
    fn on_camera_disconnected(&self);

    /// Device-chosen (or user-set) exposure changed
    fn on_camera_exposure_status(&self, iso: i32, exposure_time_ns: i64) {}

    /// Auto-exposure state machine moved
    fn on_camera_auto_exposure_state_changed(&self, state: CameraExposureState) {}

    /// Autofocus state machine moved
    fn on_camera_auto_focus_state_changed(&self, state: CameraFocusState) {}

    /// HDR capture progress in percent of expected frames
    fn on_camera_hdr_image_capture_progress(&self, percent: f32) {}

    /// HDR frames are packaged and the capture is done
    fn on_camera_hdr_image_capture_completed(&self) {}

    /// HDR capture timed out waiting for frames
    fn on_camera_hdr_image_capture_failed(&self) {}
}
