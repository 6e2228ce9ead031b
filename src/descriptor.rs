// SPDX-License-Identifier: GPL-3.0-only

//! Static camera description
//!
//! Everything the controller needs to know about a device before opening
//! it: sensor geometry, control ranges, and supported features. Adapters
//! fill this in from their platform's characteristics query.

use serde::{Deserialize, Serialize};

/// Optical image stabilization modes a device may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OisMode {
    Off,
    On,
}

/// Static description of a camera device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    /// Adapter-scoped device id
    pub id: String,
    /// Sensor active array as (left, top, width, height) in sensor pixels
    pub sensor_active_array: [i32; 4],
    /// Exposure compensation range in device steps, min..=max
    pub exposure_compensation_range: [i32; 2],
    /// Supported ISO range, min..=max
    pub iso_range: [i32; 2],
    /// Supported exposure time range in nanoseconds, min..=max
    pub exposure_time_range: [i64; 2],
    /// Maximum number of autofocus metering regions (0 = unsupported)
    pub max_af_regions: i32,
    /// Maximum number of auto-exposure metering regions (0 = unsupported)
    pub max_ae_regions: i32,
    /// Advertised OIS modes
    pub ois_modes: Vec<OisMode>,
}

impl CameraDescriptor {
    /// Whether the device can stabilize the lens during capture
    pub fn supports_ois(&self) -> bool {
        self.ois_modes.contains(&OisMode::On)
    }
}

impl Default for CameraDescriptor {
    fn default() -> Self {
        Self {
            id: "0".to_string(),
            sensor_active_array: [0, 0, 4000, 3000],
            exposure_compensation_range: [-24, 24],
            iso_range: [50, 6400],
            exposure_time_range: [100_000, 500_000_000],
            max_af_regions: 1,
            max_ae_regions: 1,
            ois_modes: vec![OisMode::Off, OisMode::On],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_supports_ois() {
        assert!(CameraDescriptor::default().supports_ois());
    }

    #[test]
    fn test_no_ois_modes() {
        let descriptor = CameraDescriptor {
            ois_modes: vec![OisMode::Off],
            ..Default::default()
        };
        assert!(!descriptor.supports_ois());
    }
}
