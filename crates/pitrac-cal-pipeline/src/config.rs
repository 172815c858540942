use std::time::Duration;

use pitrac_cal_core::constants::BALL_RADIUS_M;
use pitrac_cal_core::{CameraId, CharucoBoard, FocalRange, Real, SensorSpec};
use serde::{Deserialize, Serialize};

use crate::DetectionPolicy;

/// Everything a session needs to know about the rig, captured once at
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub camera: CameraId,
    /// Camera 2 in strobed still-capture mode.
    pub strobed: bool,
    pub sensor: SensorSpec,
    pub board: CharucoBoard,
    pub ball_radius_m: Real,
    pub focal_range: FocalRange,
    /// Corner sets with fewer points are never accumulated.
    pub min_corners: usize,
    pub intrinsic_auto_count: usize,
    pub intrinsic_auto_interval: Duration,
    /// Samples required before a manual finalize.
    pub intrinsic_manual_min: usize,
    pub extrinsic_sample_target: usize,
    pub strobed_frame_budget: usize,
    pub strobed_min_valid: usize,
    pub strobed_interval: Duration,
    /// Loop period / operator poll timeout.
    pub tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera: CameraId::One,
            strobed: false,
            sensor: SensorSpec::default(),
            board: CharucoBoard::default(),
            ball_radius_m: BALL_RADIUS_M,
            focal_range: FocalRange::default(),
            min_corners: 4,
            intrinsic_auto_count: 15,
            intrinsic_auto_interval: Duration::from_secs(2),
            intrinsic_manual_min: 3,
            extrinsic_sample_target: 6,
            strobed_frame_budget: 6,
            strobed_min_valid: 3,
            strobed_interval: Duration::from_secs(5),
            tick: Duration::from_millis(30),
        }
    }
}

impl SessionConfig {
    /// Defaults for `camera`. Strobed capture only applies to camera 2.
    pub fn for_camera(camera: CameraId, strobed: bool) -> Self {
        Self {
            camera,
            strobed: strobed && camera == CameraId::Two,
            ..Self::default()
        }
    }

    pub fn detection_policy(&self) -> DetectionPolicy {
        if self.strobed {
            DetectionPolicy::strobed()
        } else {
            DetectionPolicy::standard()
        }
    }
}
