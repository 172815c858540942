//! Observation and result types exchanged between detectors, solvers and the
//! calibration sessions.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use crate::{Mat3, Pt2, Real};

/// Reference-pattern corners found in one frame: pattern-space corner ids and
/// their pixel positions, index-aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CornerSet {
    pub ids: Vec<u32>,
    pub pixels: Vec<Pt2>,
}

impl CornerSet {
    pub fn new(ids: Vec<u32>, pixels: Vec<Pt2>) -> Result<Self> {
        ensure!(
            ids.len() == pixels.len(),
            "corner id count ({}) != pixel count ({})",
            ids.len(),
            pixels.len()
        );
        Ok(Self { ids, pixels })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Circular ball detection in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallDetection {
    pub center: Pt2,
    pub radius: Real,
}

impl BallDetection {
    pub fn new(x: Real, y: Real, radius: Real) -> Self {
        Self {
            center: Pt2::new(x, y),
            radius,
        }
    }
}

/// 2D-2D correspondences between a planar pattern (Z=0) and the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanarView {
    /// Pattern-plane coordinates (millimeters).
    pub board_points: Vec<Pt2>,
    /// Observed (distorted) pixel coordinates.
    pub pixel_points: Vec<Pt2>,
}

impl PlanarView {
    pub fn new(board_points: Vec<Pt2>, pixel_points: Vec<Pt2>) -> Result<Self> {
        ensure!(
            board_points.len() == pixel_points.len(),
            "board point count ({}) != pixel count ({})",
            board_points.len(),
            pixel_points.len()
        );
        Ok(Self {
            board_points,
            pixel_points,
        })
    }

    pub fn len(&self) -> usize {
        self.board_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.board_points.is_empty()
    }
}

/// Intrinsic calibration outcome.
///
/// Produced once per successful solve and never mutated; a later solve
/// produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicResult {
    /// 3x3 projection matrix K.
    pub camera_matrix: Mat3,
    /// Distortion coefficients `[k1, k2, p1, p2, k3]`.
    pub distortion: [Real; 5],
    /// RMS reprojection error in pixels.
    pub rms_error: Real,
}

/// Camera mounting angles relative to the bore-sight, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraAngles {
    pub yaw_deg: Real,
    pub pitch_deg: Real,
}

/// Extrinsic calibration outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicResult {
    pub focal_length_mm: Real,
    pub angles: CameraAngles,
    /// Ball radius the focal length was derived with.
    pub ball_radius_m: Real,
}

impl ExtrinsicResult {
    pub fn yaw_deg(&self) -> Real {
        self.angles.yaw_deg
    }

    pub fn pitch_deg(&self) -> Real {
        self.angles.pitch_deg
    }
}
