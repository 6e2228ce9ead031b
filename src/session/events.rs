// SPDX-License-Identifier: GPL-3.0-only

//! Session event loop messages
//!
//! Every control mutation and every adapter callback is carried through the
//! event queue as one of these records. Payloads are string-keyed JSON
//! scalars; 64-bit integers travel as decimal strings to avoid precision
//! loss in the number representation.

use serde_json::{json, Value};

/// What an event asks the loop to do.
///
/// Actions originate from the external API; events originate from adapter
/// callbacks. The loop treats both identically and strictly in arrival
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    // Actions
    OpenCamera,
    CloseCamera,
    PauseCapture,
    ResumeCapture,
    SetAutoExposure,
    SetManualExposure,
    SetExposureCompensation,
    SetAutoFocus,
    SetFocusPoint,
    CaptureHdr,

    // Events
    SaveHdrData,
    CameraError,
    CameraDisconnected,
    CameraSessionChanged,
    CameraExposureStatusChanged,
    CameraAutoExposureStateChanged,
    CameraAutoFocusStateChanged,
    CameraTriggerAfCompleted,

    /// Loop shutdown sentinel; the loop exits once this has been seen and
    /// the session state is closed.
    Stop,
}

/// One queued event
#[derive(Debug, Clone)]
pub struct Event {
    pub action: EventAction,
    pub data: Value,
}

impl Event {
    pub fn new(action: EventAction) -> Self {
        Self {
            action,
            data: Value::Null,
        }
    }

    pub fn with_data(action: EventAction, data: Value) -> Self {
        Self { action, data }
    }
}

/// Encode an i64 for an event payload
pub fn i64_value(value: i64) -> Value {
    json!(value.to_string())
}

pub fn get_bool(data: &Value, key: &str) -> bool {
    data.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub fn get_i32(data: &Value, key: &str) -> i32 {
    data.get(key)
        .and_then(Value::as_i64)
        .map(|v| v as i32)
        .unwrap_or(0)
}

pub fn get_f64(data: &Value, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Decode an i64 carried as a decimal string
pub fn get_i64_str(data: &Value, key: &str) -> i64 {
    data.get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
