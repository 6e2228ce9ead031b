// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture engine
//!
//! Errors never escape the event-loop thread: the loop converts them into
//! listener callbacks and, where fatal, into an implicit close. Callers of
//! the external session API never observe these as return values.

use std::fmt;

/// Result type for device adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Result type for session-internal operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors reported by a device adapter implementation
#[derive(Debug, Clone)]
pub enum AdapterError {
    /// No device with the requested id
    NotFound(String),
    /// Device is held by another client
    InUse(String),
    /// Host denied camera access
    PermissionDenied(String),
    /// Anything else the platform layer reports
    Internal(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::NotFound(msg) => write!(f, "Device not found: {}", msg),
            AdapterError::InUse(msg) => write!(f, "Device in use: {}", msg),
            AdapterError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            AdapterError::Internal(msg) => write!(f, "Adapter error: {}", msg),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Errors raised while processing session events
#[derive(Debug, Clone)]
pub enum SessionError {
    /// Opening the device failed (fatal for the session)
    DeviceOpen(AdapterError),
    /// Creating the capture session failed (fatal at open)
    SessionCreate(String),
    /// Building or submitting a capture request failed (fatal at open)
    RequestBuild(String),
    /// Event handler raised an unexpected condition
    Internal(String),
}

impl SessionError {
    /// Numeric code surfaced through the listener's error callback.
    ///
    /// Device-reported error codes are positive; session-side failures use
    /// the negative range so hosts can tell them apart.
    pub fn code(&self) -> i32 {
        match self {
            SessionError::DeviceOpen(_) => -1,
            SessionError::SessionCreate(_) => -2,
            SessionError::RequestBuild(_) => -3,
            SessionError::Internal(_) => -4,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::DeviceOpen(err) => write!(f, "Failed to open camera: {}", err),
            SessionError::SessionCreate(msg) => {
                write!(f, "Failed to create capture session: {}", msg)
            }
            SessionError::RequestBuild(msg) => write!(f, "Failed to build request: {}", msg),
            SessionError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::DeviceOpen(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AdapterError> for SessionError {
    fn from(err: AdapterError) -> Self {
        SessionError::DeviceOpen(err)
    }
}
