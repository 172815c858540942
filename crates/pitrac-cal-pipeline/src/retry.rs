//! Detection retry policy: an ordered list of sensitivity presets.
//!
//! Presets are tried in order until one finds the ball. The standard policy
//! has a single preset; the strobed policy relaxes thresholds for the darker
//! strobed frames of camera 2 and falls back to an even more permissive set.

use log::debug;
use pitrac_cal_core::BallDetection;
use serde::{Deserialize, Serialize};

use crate::{BallDetector, Frame};

/// Circle detector sensitivity parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPreset {
    pub name: String,
    pub min_radius_px: u32,
    pub max_radius_px: u32,
    /// Upper edge-detector threshold.
    pub edge_threshold: f64,
    /// Circle-center accumulator threshold.
    pub accumulator_threshold: f64,
    /// Minimum mean brightness inside the circle.
    pub min_brightness: Option<u8>,
    pub allow_dark_fallback: bool,
}

impl DetectionPreset {
    pub fn standard() -> Self {
        Self {
            name: "standard".into(),
            min_radius_px: 20,
            max_radius_px: 200,
            edge_threshold: 100.0,
            accumulator_threshold: 30.0,
            min_brightness: None,
            allow_dark_fallback: false,
        }
    }

    pub fn strobed() -> Self {
        Self {
            name: "strobed".into(),
            min_radius_px: 15,
            max_radius_px: 140,
            edge_threshold: 70.0,
            accumulator_threshold: 22.0,
            min_brightness: Some(35),
            allow_dark_fallback: true,
        }
    }

    pub fn strobed_permissive() -> Self {
        Self {
            name: "strobed-permissive".into(),
            min_radius_px: 12,
            max_radius_px: 170,
            edge_threshold: 50.0,
            accumulator_threshold: 16.0,
            min_brightness: Some(15),
            allow_dark_fallback: true,
        }
    }
}

/// A detection and the index of the preset that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyDetection {
    pub detection: BallDetection,
    pub preset_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPolicy {
    presets: Vec<DetectionPreset>,
}

impl DetectionPolicy {
    pub fn new(presets: Vec<DetectionPreset>) -> Self {
        Self { presets }
    }

    pub fn standard() -> Self {
        Self::new(vec![DetectionPreset::standard()])
    }

    pub fn strobed() -> Self {
        Self::new(vec![
            DetectionPreset::strobed(),
            DetectionPreset::strobed_permissive(),
        ])
    }

    /// Append a fallback tried after the existing presets.
    pub fn with_fallback(mut self, preset: DetectionPreset) -> Self {
        self.presets.push(preset);
        self
    }

    pub fn presets(&self) -> &[DetectionPreset] {
        &self.presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Run the presets in order on one frame; the first hit wins.
    ///
    /// `None` means every preset missed: the caller counts the frame as a
    /// missed capture.
    pub fn detect(
        &self,
        detector: &mut dyn BallDetector,
        frame: &Frame,
    ) -> Option<PolicyDetection> {
        for (preset_index, preset) in self.presets.iter().enumerate() {
            if let Some(detection) = detector.detect(frame, preset) {
                if preset_index > 0 {
                    debug!(
                        "frame {}: ball found by fallback preset '{}'",
                        frame.index, preset.name
                    );
                }
                return Some(PolicyDetection {
                    detection,
                    preset_index,
                });
            }
        }
        None
    }
}
