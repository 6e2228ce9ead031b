// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for the capture engine
//!
//! These enums cross every layer: the device adapter reports them, the
//! session controller routes them, and frame metadata records them.

use serde::{Deserialize, Serialize};

/// Capture session state, driven exclusively by device adapter callbacks.
///
/// The controller never asserts a state on its own; it only reflects what
/// the adapter reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraSessionState {
    /// No session configured (initial and terminal state)
    Closed,
    /// Session configured, no repeating request in flight
    Ready,
    /// Repeating request in flight
    Active,
}

impl CameraSessionState {
    pub fn as_i32(self) -> i32 {
        match self {
            CameraSessionState::Closed => 0,
            CameraSessionState::Ready => 1,
            CameraSessionState::Active => 2,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => CameraSessionState::Ready,
            2 => CameraSessionState::Active,
            _ => CameraSessionState::Closed,
        }
    }
}

/// Exposure control mode of the repeating request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    /// Device-controlled auto exposure
    Auto,
    /// User-supplied ISO and exposure time
    Manual,
}

/// Auto-exposure state reported in completed-capture metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraExposureState {
    Inactive,
    Searching,
    Converged,
    Locked,
    FlashRequired,
    Precapture,
}

impl CameraExposureState {
    pub fn as_i32(self) -> i32 {
        match self {
            CameraExposureState::Inactive => 0,
            CameraExposureState::Searching => 1,
            CameraExposureState::Converged => 2,
            CameraExposureState::Locked => 3,
            CameraExposureState::FlashRequired => 4,
            CameraExposureState::Precapture => 5,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => CameraExposureState::Searching,
            2 => CameraExposureState::Converged,
            3 => CameraExposureState::Locked,
            4 => CameraExposureState::FlashRequired,
            5 => CameraExposureState::Precapture,
            _ => CameraExposureState::Inactive,
        }
    }
}

/// Autofocus state reported in completed-capture metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraFocusState {
    Inactive,
    PassiveScan,
    PassiveFocused,
    ActiveScan,
    FocusLocked,
    NotFocusLocked,
    PassiveUnfocused,
}

impl CameraFocusState {
    pub fn as_i32(self) -> i32 {
        match self {
            CameraFocusState::Inactive => 0,
            CameraFocusState::PassiveScan => 1,
            CameraFocusState::PassiveFocused => 2,
            CameraFocusState::ActiveScan => 3,
            CameraFocusState::FocusLocked => 4,
            CameraFocusState::NotFocusLocked => 5,
            CameraFocusState::PassiveUnfocused => 6,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => CameraFocusState::PassiveScan,
            2 => CameraFocusState::PassiveFocused,
            3 => CameraFocusState::ActiveScan,
            4 => CameraFocusState::FocusLocked,
            5 => CameraFocusState::NotFocusLocked,
            6 => CameraFocusState::PassiveUnfocused,
            _ => CameraFocusState::Inactive,
        }
    }
}

/// Screen orientation at capture time, recorded into frame metadata so the
/// downstream processor can rotate output correctly.
///
/// Stored as an atomic scalar in the session; see [`ScreenOrientation::as_u8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScreenOrientation {
    #[default]
    Portrait,
    ReversePortrait,
    Landscape,
    ReverseLandscape,
}

impl ScreenOrientation {
    pub fn as_u8(self) -> u8 {
        match self {
            ScreenOrientation::Portrait => 0,
            ScreenOrientation::ReversePortrait => 1,
            ScreenOrientation::Landscape => 2,
            ScreenOrientation::ReverseLandscape => 3,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ScreenOrientation::ReversePortrait,
            2 => ScreenOrientation::Landscape,
            3 => ScreenOrientation::ReverseLandscape,
            _ => ScreenOrientation::Portrait,
        }
    }
}

/// Why a raw frame was captured.
///
/// ZSL frames come from the continuously repeating request; HDR frames come
/// from a bracketed burst. The buffer pool counts and drains HDR frames
/// separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RawType {
    #[default]
    Zsl,
    Hdr,
}

/// Pixel layout of a raw sensor frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawPixelFormat {
    /// 10-bit packed Bayer (4 pixels in 5 bytes)
    Raw10,
    /// 12-bit packed Bayer (2 pixels in 3 bytes)
    Raw12,
    /// 16-bit Bayer, one u16 per pixel
    Raw16,
}

impl RawPixelFormat {
    /// Minimum bytes per row for `width` pixels, before stride padding
    pub fn min_row_bytes(self, width: u32) -> usize {
        match self {
            RawPixelFormat::Raw10 => (width as usize * 5).div_ceil(4),
            RawPixelFormat::Raw12 => (width as usize * 3).div_ceil(2),
            RawPixelFormat::Raw16 => width as usize * 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            CameraSessionState::Closed,
            CameraSessionState::Ready,
            CameraSessionState::Active,
        ] {
            assert_eq!(CameraSessionState::from_i32(state.as_i32()), state);
        }
    }

    #[test]
    fn test_unknown_states_map_to_inactive() {
        assert_eq!(
            CameraExposureState::from_i32(99),
            CameraExposureState::Inactive
        );
        assert_eq!(CameraFocusState::from_i32(-1), CameraFocusState::Inactive);
        assert_eq!(CameraSessionState::from_i32(99), CameraSessionState::Closed);
    }

    #[test]
    fn test_raw16_row_bytes() {
        assert_eq!(RawPixelFormat::Raw16.min_row_bytes(4000), 8000);
        assert_eq!(RawPixelFormat::Raw10.min_row_bytes(4), 5);
        assert_eq!(RawPixelFormat::Raw12.min_row_bytes(2), 3);
    }
}
