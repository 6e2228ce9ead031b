// SPDX-License-Identifier: GPL-3.0-only

//! Session lifecycle integration tests against the simulated adapter

mod common;

use common::{harness, wait_until, ListenerEvent};
use rawcam::adapter::{control_values, ControlEntry, ControlTag, OutputTarget};
use rawcam::errors::AdapterError;
use rawcam::types::{CameraFocusState, CameraSessionState};
use std::time::{Duration, Instant};

#[test]
fn test_open_active_close() {
    let h = harness();

    h.session.open_camera(h.output, false);
    assert!(wait_until(|| {
        h.listener.last_state() == Some(CameraSessionState::Active)
    }));

    // The adapter walked the session through ready before active
    let states: Vec<_> = h
        .listener
        .events()
        .into_iter()
        .filter(|e| matches!(e, ListenerEvent::State(_)))
        .collect();
    assert_eq!(
        states,
        vec![
            ListenerEvent::State(CameraSessionState::Ready),
            ListenerEvent::State(CameraSessionState::Active),
        ]
    );

    // Repeating request carries the ZSL template and both output targets
    let snapshot = h.adapter.repeating_snapshot().unwrap();
    assert_eq!(
        snapshot
            .entry(ControlTag::CaptureIntent)
            .and_then(|e| e.as_u8()),
        Some(control_values::CAPTURE_INTENT_ZERO_SHUTTER_LAG)
    );
    assert_eq!(
        snapshot.entry(ControlTag::AeMode).and_then(|e| e.as_u8()),
        Some(control_values::AE_MODE_ON)
    );
    assert_eq!(
        snapshot.entry(ControlTag::AfMode).and_then(|e| e.as_u8()),
        Some(control_values::AF_MODE_CONTINUOUS_PICTURE)
    );
    assert_eq!(
        snapshot.entry(ControlTag::OisMode).and_then(|e| e.as_u8()),
        Some(control_values::OIS_MODE_ON)
    );
    assert!(snapshot.targets.contains(&OutputTarget::Preview));
    assert!(snapshot.targets.contains(&OutputTarget::RawReader));

    let close_started = Instant::now();
    h.session.close_camera();
    assert!(close_started.elapsed() < Duration::from_millis(500));
    assert_eq!(h.listener.last_state(), Some(CameraSessionState::Closed));
}

#[test]
fn test_raw_preview_skips_preview_target() {
    let h = harness();
    h.session.open_camera(h.output, true);
    assert!(wait_until(|| {
        h.listener.last_state() == Some(CameraSessionState::Active)
    }));

    let snapshot = h.adapter.repeating_snapshot().unwrap();
    assert!(!snapshot.targets.contains(&OutputTarget::Preview));
    assert!(snapshot.targets.contains(&OutputTarget::RawReader));

    h.session.close_camera();
}

#[test]
fn test_close_twice_is_safe() {
    let h = harness();
    h.open_and_activate();

    h.session.close_camera();
    let events_after_first_close = h.listener.events().len();

    // The second close observes no session and returns immediately
    h.session.close_camera();
    assert_eq!(h.listener.events().len(), events_after_first_close);
}

#[test]
fn test_callbacks_after_close_have_no_effect() {
    let h = harness();
    h.open_and_activate();
    h.session.close_camera();

    let events_before = h.listener.events().len();
    h.adapter.fire_device_error(7);
    h.adapter.fire_disconnected();
    assert!(h.adapter.fire_repeating_frame().is_none());

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.listener.events().len(), events_before);
}

#[test]
fn test_open_failure_reports_error() {
    let h = harness();
    h.adapter
        .fail_next_open(AdapterError::InUse("0".to_string()));

    h.session.open_camera(h.output, false);
    assert!(wait_until(|| h.listener.contains(&ListenerEvent::Error(-1))));
    assert_ne!(h.listener.last_state(), Some(CameraSessionState::Active));

    h.session.close_camera();
}

#[test]
fn test_manual_exposure_round_trip() {
    let h = harness();
    h.open_and_activate();
    let initial_snapshot = h.adapter.repeating_snapshot().unwrap();

    // Auto exposure reports device-chosen values on the first frame
    h.adapter.fire_repeating_frame();
    assert!(wait_until(|| {
        h.listener
            .events()
            .iter()
            .any(|e| matches!(e, ListenerEvent::ExposureStatus { .. }))
    }));

    h.session.set_manual_exposure(800, 20_000_000);
    assert!(wait_until(|| {
        h.adapter
            .repeating_snapshot()
            .and_then(|s| s.entry(ControlTag::AeMode).and_then(|e| e.as_u8()))
            == Some(control_values::AE_MODE_OFF)
    }));

    let manual = h.adapter.repeating_snapshot().unwrap();
    assert_eq!(
        manual
            .entry(ControlTag::SensorSensitivity)
            .and_then(|e| e.as_i32()),
        Some(800)
    );
    assert_eq!(
        manual
            .entry(ControlTag::SensorExposureTime)
            .and_then(|e| e.as_i64()),
        Some(20_000_000)
    );
    assert!(manual.entry(ControlTag::AeExposureCompensation).is_none());

    // Completion metadata now reports the user's values
    h.adapter.fire_repeating_frame();
    assert!(wait_until(|| {
        h.listener.contains(&ListenerEvent::ExposureStatus {
            iso: 800,
            exposure_time_ns: 20_000_000,
        })
    }));

    // Back to auto: the repeating request matches the freshly opened one
    h.session.set_auto_exposure();
    assert!(wait_until(|| {
        h.adapter
            .repeating_snapshot()
            .and_then(|s| s.entry(ControlTag::AeMode).and_then(|e| e.as_u8()))
            == Some(control_values::AE_MODE_ON)
    }));

    let restored = h.adapter.repeating_snapshot().unwrap();
    assert_eq!(restored.entries, initial_snapshot.entries);

    h.adapter.fire_repeating_frame();
    assert!(wait_until(|| {
        h.listener
            .events()
            .iter()
            .filter(|e| matches!(e, ListenerEvent::ExposureStatus { .. }))
            .count()
            >= 3
    }));

    h.session.close_camera();
}

#[test]
fn test_exposure_compensation_mapped_to_device_range() {
    let h = harness();
    h.open_and_activate();

    h.session.set_exposure_compensation(1.0);
    assert!(wait_until(|| {
        h.adapter
            .repeating_snapshot()
            .and_then(|s| {
                s.entry(ControlTag::AeExposureCompensation)
                    .and_then(|e| e.as_i32())
            })
            == Some(24)
    }));

    // Out-of-range input clamps to the top of the range
    h.session.set_exposure_compensation(7.0);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        h.adapter
            .repeating_snapshot()
            .unwrap()
            .entry(ControlTag::AeExposureCompensation)
            .and_then(|e| e.as_i32()),
        Some(24)
    );

    h.session.close_camera();
}

#[test]
fn test_focus_point_trigger_and_resume() {
    let h = harness();
    h.open_and_activate();
    let submissions_before = h.adapter.repeating_submissions();

    h.session.set_focus_point(0.5, 0.5, 0.5, 0.5);
    assert!(wait_until(|| h.adapter.last_burst().is_some()));

    assert!(h.adapter.abort_count() >= 1);

    let (sequence_id, snapshots) = h.adapter.last_burst().unwrap();
    assert_eq!(snapshots.len(), 1);
    let trigger = &snapshots[0];
    assert_eq!(
        trigger.entry(ControlTag::AfMode).and_then(|e| e.as_u8()),
        Some(control_values::AF_MODE_AUTO)
    );
    assert_eq!(
        trigger.entry(ControlTag::AfTrigger).and_then(|e| e.as_u8()),
        Some(control_values::TRIGGER_START)
    );
    assert_eq!(
        trigger
            .entry(ControlTag::AePrecaptureTrigger)
            .and_then(|e| e.as_u8()),
        Some(control_values::TRIGGER_START)
    );

    // Centered 200 px region with weight 1000 on the default 4000x3000 array
    assert_eq!(
        trigger.entry(ControlTag::AfRegions).cloned(),
        Some(ControlEntry::I32(vec![1900, 1400, 2100, 1600, 1000]))
    );
    assert!(trigger.entry(ControlTag::AeRegions).is_some());

    // Completing the trigger one-shot clears the triggers and re-issues the
    // repeating request
    h.adapter.deliver_burst_frames(sequence_id, 1);
    assert!(wait_until(|| {
        h.adapter.repeating_submissions() > submissions_before
    }));

    let resumed = h.adapter.repeating_snapshot().unwrap();
    assert_eq!(
        resumed.entry(ControlTag::AfTrigger).and_then(|e| e.as_u8()),
        Some(control_values::TRIGGER_IDLE)
    );
    assert_eq!(
        resumed
            .entry(ControlTag::AePrecaptureTrigger)
            .and_then(|e| e.as_u8()),
        Some(control_values::TRIGGER_IDLE)
    );

    assert!(wait_until(|| {
        h.listener
            .contains(&ListenerEvent::AfState(CameraFocusState::FocusLocked))
    }));

    h.session.close_camera();
}

#[test]
fn test_pause_and_resume() {
    let h = harness();
    h.open_and_activate();

    h.session.pause_capture();
    assert!(wait_until(|| {
        h.listener.last_state() == Some(CameraSessionState::Ready)
    }));
    assert_eq!(h.adapter.stop_repeating_count(), 1);

    h.session.resume_capture();
    assert!(wait_until(|| {
        h.listener.last_state() == Some(CameraSessionState::Active)
    }));

    // Pausing while already paused is a logged no-op
    h.session.pause_capture();
    h.session.pause_capture();
    assert!(wait_until(|| h.adapter.stop_repeating_count() == 2));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.adapter.stop_repeating_count(), 2);

    h.session.close_camera();
}

#[test]
fn test_device_error_cascades_to_close() {
    let h = harness();
    h.open_and_activate();

    h.adapter.fire_device_error(2);
    assert!(wait_until(|| h.listener.contains(&ListenerEvent::Error(2))));
    assert!(wait_until(|| {
        h.listener.last_state() == Some(CameraSessionState::Closed)
    }));

    // Subsequent external calls are no-ops against the closed session
    let submissions = h.adapter.repeating_submissions();
    h.session.set_manual_exposure(400, 1_000_000);
    h.session.pause_capture();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.adapter.repeating_submissions(), submissions);

    h.session.close_camera();
}

#[test]
fn test_disconnect_cascades_to_close() {
    let h = harness();
    h.open_and_activate();

    h.adapter.fire_disconnected();
    assert!(wait_until(|| h.listener.contains(&ListenerEvent::Disconnected)));
    assert!(wait_until(|| {
        h.listener.last_state() == Some(CameraSessionState::Closed)
    }));

    h.session.close_camera();
}

#[test]
fn test_zsl_frames_reach_the_pool() {
    let h = harness();
    h.open_and_activate();

    h.adapter.fire_repeating_frame();
    let timestamp = h.adapter.fire_repeating_frame().unwrap();

    assert!(wait_until(|| !h.pool.consume_latest().is_empty()));
    assert!(wait_until(|| {
        let loan = h.pool.consume_by_timestamp(timestamp);
        let found = !loan.is_empty();
        if found {
            let buffer = loan.buffers()[0].lock().unwrap();
            assert_eq!(buffer.metadata.timestamp_ns, timestamp);
            assert_eq!(buffer.metadata.raw_type, rawcam::types::RawType::Zsl);
        }
        found
    }));

    h.session.close_camera();
}
