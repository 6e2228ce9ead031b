// SPDX-License-Identifier: GPL-3.0-only

//! Post-processing settings carried alongside a capture
//!
//! The engine does not interpret these values; they ride with the container
//! so the downstream raw processor knows how the user wants the burst
//! developed.

use serde::{Deserialize, Serialize};

/// Settings handed to the downstream processor with each saved capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessSettings {
    // Denoising
    pub spatial_denoise_aggressiveness: f32,

    // Tone mapping
    pub chroma_eps: f32,
    pub tonemap_variance: f32,
    pub gamma: f32,
    pub shadows: f32,
    pub white_point: f32,
    pub contrast: f32,
    pub blacks: f32,
    pub exposure: f32,
    pub noise_sigma: f32,
    pub scene_luminance: f32,

    // Color
    pub saturation: f32,
    pub blue_saturation: f32,
    pub green_saturation: f32,
    pub temperature: f32,
    pub tint: f32,

    // Sharpening
    pub sharpen0: f32,
    pub sharpen1: f32,

    // Output
    pub jpeg_quality: i32,
    pub flipped: bool,
    pub override_white_balance: bool,
}

impl Default for PostProcessSettings {
    fn default() -> Self {
        Self {
            spatial_denoise_aggressiveness: 1.0,
            chroma_eps: 4.0,
            tonemap_variance: 0.25,
            gamma: 2.2,
            shadows: 1.0,
            white_point: 1.0,
            contrast: 0.25,
            blacks: 0.0,
            exposure: 0.0,
            noise_sigma: 0.0,
            scene_luminance: 0.0,
            saturation: 1.0,
            blue_saturation: 1.0,
            green_saturation: 1.0,
            temperature: -1.0,
            tint: -1.0,
            sharpen0: 2.5,
            sharpen1: 1.3,
            jpeg_quality: 95,
            flipped: false,
            override_white_balance: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_json() {
        let settings = PostProcessSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: PostProcessSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let parsed: PostProcessSettings = serde_json::from_str(r#"{"gamma": 1.8}"#).unwrap();
        assert_eq!(parsed.gamma, 1.8);
        assert_eq!(parsed.jpeg_quality, 95);
    }
}
