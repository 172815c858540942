//! Calibration rig description: which camera is being calibrated and where the
//! calibration ball sits relative to it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::MIN_TARGET_DISTANCE_M;
use crate::geometry::GeometryError;
use crate::Real;

/// One of the two cameras of the launch monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraId {
    /// Camera 1: the teed-ball camera, continuous capture.
    One,
    /// Camera 2: the flight camera, usually strobed.
    Two,
}

impl CameraId {
    /// 1-based camera number as used in configuration keys.
    pub fn number(self) -> u8 {
        match self {
            CameraId::One => 1,
            CameraId::Two => 2,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(CameraId::One),
            2 => Some(CameraId::Two),
            _ => None,
        }
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "camera {}", self.number())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RigError {
    #[error("unknown calibration rig type: {0}")]
    UnknownRigType(i64),
}

/// Physical arrangement of the cameras during calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RigType {
    /// Both cameras point straight out from the enclosure.
    StraightForward,
    /// Camera 1 is skewed towards the tee.
    SkewedCamera1,
    /// User-measured positions.
    Custom,
}

impl RigType {
    /// Selector value stored in the configuration file.
    pub fn selector(self) -> i64 {
        match self {
            RigType::StraightForward => 1,
            RigType::SkewedCamera1 => 2,
            RigType::Custom => 3,
        }
    }
}

impl TryFrom<i64> for RigType {
    type Error = RigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RigType::StraightForward),
            2 => Ok(RigType::SkewedCamera1),
            3 => Ok(RigType::Custom),
            other => Err(RigError::UnknownRigType(other)),
        }
    }
}

/// Metric position (meters) of the calibration ball in a camera's frame:
/// `x` right, `y` up, `z` out along the bore-sight.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferencePosition {
    pub x: Real,
    pub y: Real,
    pub z: Real,
}

impl ReferencePosition {
    pub fn new(x: Real, y: Real, z: Real) -> Self {
        Self { x, y, z }
    }

    /// Direct camera-to-ball distance.
    pub fn distance(&self) -> Real {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Check that the ball is in front of the camera and not at its origin.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let distance = self.distance();
        if distance <= MIN_TARGET_DISTANCE_M {
            return Err(GeometryError::TargetTooClose { distance });
        }
        if self.z <= 0.0 {
            return Err(GeometryError::TargetBehindCamera { z: self.z });
        }
        Ok(())
    }
}

impl From<[Real; 3]> for ReferencePosition {
    fn from(v: [Real; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}
