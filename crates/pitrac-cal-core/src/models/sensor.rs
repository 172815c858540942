use serde::{Deserialize, Serialize};

use crate::constants::{RESOLUTION_X, RESOLUTION_Y, SENSOR_HEIGHT_MM, SENSOR_WIDTH_MM};
use crate::Real;

/// Physical sensor size and native pixel resolution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    pub width_mm: Real,
    pub height_mm: Real,
    pub resolution_x: u32,
    pub resolution_y: u32,
}

impl Default for SensorSpec {
    fn default() -> Self {
        Self {
            width_mm: SENSOR_WIDTH_MM,
            height_mm: SENSOR_HEIGHT_MM,
            resolution_x: RESOLUTION_X,
            resolution_y: RESOLUTION_Y,
        }
    }
}

impl SensorSpec {
    /// Pixel coordinates of the optical center, rounded to whole pixels.
    pub fn center_px(&self) -> (Real, Real) {
        (
            (self.resolution_x as Real / 2.0).round(),
            (self.resolution_y as Real / 2.0).round(),
        )
    }

    pub fn resolution(&self) -> ImageSize {
        ImageSize::new(self.resolution_x, self.resolution_y)
    }
}

/// Frame dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
