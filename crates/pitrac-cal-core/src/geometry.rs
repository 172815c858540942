//! Closed-form ball geometry.
//!
//! These are pure functions relating the apparent size and position of the
//! calibration ball in an image to the lens focal length and to the camera's
//! mounting angles. All of them are deterministic and side-effect free; range
//! checks on focal lengths are left to the caller.
//!
//! Sign conventions follow the tracker: positive yaw turns the camera to the
//! left (towards negative X), negative pitch looks down.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    BALL_RADIUS_M, EXPECTED_RADIUS_REFERENCE_DISTANCE_M, MAX_FOCAL_LENGTH_MM,
    MAX_REASONABLE_ANGLE_DEG, MIN_FOCAL_LENGTH_MM,
};
use crate::{CameraAngles, ImageSize, Pt2, Real, ReferencePosition, SensorSpec};

/// Failures of the angle computation.
///
/// `TargetTooClose` and `TargetBehindCamera` are domain errors (the reference
/// position cannot describe a visible ball); `AngleOutOfRange` is a range
/// error (the inputs are well formed but the result is implausible).
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum GeometryError {
    #[error("reference position too close to camera (distance {distance:.6} m)")]
    TargetTooClose { distance: Real },
    #[error("reference position must be in front of the camera, got z = {z} m")]
    TargetBehindCamera { z: Real },
    #[error("computed angles (yaw {yaw:.2}, pitch {pitch:.2}) exceed +/- {bound} degrees")]
    AngleOutOfRange { yaw: Real, pitch: Real, bound: Real },
}

impl GeometryError {
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            GeometryError::TargetTooClose { .. } | GeometryError::TargetBehindCamera { .. }
        )
    }

    pub fn is_range(&self) -> bool {
        matches!(self, GeometryError::AngleOutOfRange { .. })
    }
}

/// Inclusive range of plausible lens focal lengths, millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalRange {
    pub min_mm: Real,
    pub max_mm: Real,
}

impl Default for FocalRange {
    fn default() -> Self {
        Self {
            min_mm: MIN_FOCAL_LENGTH_MM,
            max_mm: MAX_FOCAL_LENGTH_MM,
        }
    }
}

impl FocalRange {
    pub fn contains(&self, focal_mm: Real) -> bool {
        (self.min_mm..=self.max_mm).contains(&focal_mm)
    }
}

/// Focal length implied by a ball of known size seen at a known distance.
///
/// `f = distance * sensor_width * (2 * radius_px / resolution_x) / (2 * ball_radius)`
pub fn focal_length_mm(
    radius_px: Real,
    distance_m: Real,
    sensor_width_mm: Real,
    resolution_x: u32,
    ball_radius_m: Real,
) -> Real {
    distance_m * sensor_width_mm * (2.0 * radius_px / resolution_x as Real) / (2.0 * ball_radius_m)
}

/// [`focal_length_mm`] for a golf ball on the given sensor.
pub fn focal_length_for_sensor(radius_px: Real, distance_m: Real, sensor: &SensorSpec) -> Real {
    focal_length_mm(
        radius_px,
        distance_m,
        sensor.width_mm,
        sensor.resolution_x,
        BALL_RADIUS_M,
    )
}

/// Ball radius in pixels expected at `distance_m` for a lens of `focal_mm`,
/// rounded to whole pixels. Inverse of [`focal_length_mm`] for a ball of
/// `ball_radius_m`.
pub fn expected_ball_radius_px(
    focal_mm: Real,
    distance_m: Real,
    ball_radius_m: Real,
    sensor: &SensorSpec,
) -> i64 {
    let radius =
        focal_mm * ball_radius_m * sensor.resolution_x as Real / (distance_m * sensor.width_mm);
    radius.round() as i64
}

/// [`expected_ball_radius_px`] at the 40 cm reference distance.
pub fn expected_ball_radius_px_at_40cm(
    focal_mm: Real,
    ball_radius_m: Real,
    sensor: &SensorSpec,
) -> i64 {
    expected_ball_radius_px(
        focal_mm,
        EXPECTED_RADIUS_REFERENCE_DISTANCE_M,
        ball_radius_m,
        sensor,
    )
}

/// Convert a pixel offset from the image center into meters at depth `z_m`.
///
/// Similar triangles: the half-extent visible at `z_m` is
/// `(z / f) * (sensor_dim / 2)`, spread over `resolution_dim / 2` pixels.
pub fn pixel_offset_to_meters(
    z_m: Real,
    offset_px: Real,
    focal_mm: Real,
    sensor_dim_mm: Real,
    resolution_dim: u32,
) -> Real {
    let half_extent_m = (z_m / focal_mm) * (sensor_dim_mm / 2.0);
    half_extent_m * (offset_px / (resolution_dim as Real / 2.0))
}

/// Horizontal pixel offset to meters using the sensor width.
pub fn x_offset_to_meters(z_m: Real, offset_px: Real, focal_mm: Real, sensor: &SensorSpec) -> Real {
    pixel_offset_to_meters(z_m, offset_px, focal_mm, sensor.width_mm, sensor.resolution_x)
}

/// Vertical pixel offset to meters using the sensor height.
pub fn y_offset_to_meters(z_m: Real, offset_px: Real, focal_mm: Real, sensor: &SensorSpec) -> Real {
    pixel_offset_to_meters(z_m, offset_px, focal_mm, sensor.height_mm, sensor.resolution_y)
}

/// Camera mounting angles from one ball detection at a known position.
///
/// The angle from the bore-sight to the detected ball is compared with the
/// angle a perfectly straight camera would see for `position`; the difference
/// is the mounting angle on each axis.
///
/// When `image_size` differs from the sensor resolution (binned capture modes)
/// the detection is rescaled into sensor pixels first.
///
/// # Errors
///
/// - [`GeometryError::TargetTooClose`] if `|position|` is (nearly) zero.
/// - [`GeometryError::TargetBehindCamera`] if `position.z <= 0`.
/// - [`GeometryError::AngleOutOfRange`] if |yaw| or |pitch| exceeds 45°.
pub fn angle_from_geometry(
    ball_center_px: Pt2,
    image_size: ImageSize,
    focal_mm: Real,
    position: &ReferencePosition,
    sensor: &SensorSpec,
) -> Result<CameraAngles, GeometryError> {
    let (scale_x, scale_y) = sensor_scale(image_size, sensor);
    let (center_x, center_y) = sensor.center_px();
    let x_from_center = ball_center_px.x * scale_x - center_x;
    let y_from_center = ball_center_px.y * scale_y - center_y;

    position.validate()?;
    let distance = position.distance();

    let x_m = x_offset_to_meters(distance, x_from_center, focal_mm, sensor);
    let y_m = y_offset_to_meters(distance, y_from_center, focal_mm, sensor);

    // Image x grows to the right and image y grows downwards.
    let x_angle_camera = -(x_m / distance).atan().to_degrees();
    let y_angle_camera = (-y_m / distance).atan().to_degrees();

    // What a camera pointing straight along its mechanical axis would see.
    let x_angle_reference = -(position.x / position.z).atan().to_degrees();
    let horizontal = (position.x * position.x + position.z * position.z).sqrt();
    let y_angle_reference = (position.y / horizontal).atan().to_degrees();

    let yaw = x_angle_reference - x_angle_camera;
    let pitch = y_angle_reference - y_angle_camera;

    if yaw.abs() > MAX_REASONABLE_ANGLE_DEG || pitch.abs() > MAX_REASONABLE_ANGLE_DEG {
        return Err(GeometryError::AngleOutOfRange {
            yaw,
            pitch,
            bound: MAX_REASONABLE_ANGLE_DEG,
        });
    }

    Ok(CameraAngles {
        yaw_deg: yaw,
        pitch_deg: pitch,
    })
}

fn sensor_scale(image_size: ImageSize, sensor: &SensorSpec) -> (Real, Real) {
    if image_size.is_empty() {
        return (1.0, 1.0);
    }
    (
        sensor.resolution_x as Real / image_size.width as Real,
        sensor.resolution_y as Real / image_size.height as Real,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn focal_range_is_inclusive() {
        let range = FocalRange::default();
        assert!(range.contains(2.0));
        assert!(range.contains(50.0));
        assert!(!range.contains(1.999));
        assert!(!range.contains(50.001));
    }

    #[test]
    fn expected_radius_inverts_focal_length() {
        let sensor = SensorSpec::default();
        let focal = focal_length_for_sensor(85.0, 0.4, &sensor);
        assert_eq!(expected_ball_radius_px(focal, 0.4, BALL_RADIUS_M, &sensor), 85);
        assert_eq!(
            expected_ball_radius_px_at_40cm(focal, BALL_RADIUS_M, &sensor),
            85
        );
    }

    #[test]
    fn expected_radius_scales_with_ball_size() {
        let sensor = SensorSpec::default();
        let focal = focal_length_for_sensor(85.0, 0.4, &sensor);
        assert_eq!(
            expected_ball_radius_px_at_40cm(focal, 2.0 * BALL_RADIUS_M, &sensor),
            170
        );
    }

    #[test]
    fn half_resolution_frame_is_rescaled() {
        let sensor = SensorSpec::default();
        let position = ReferencePosition::new(0.0, 0.0, 0.5);
        let angles = angle_from_geometry(
            Pt2::new(364.0, 272.0),
            ImageSize::new(728, 544),
            6.0,
            &position,
            &sensor,
        )
        .unwrap();
        assert_relative_eq!(angles.yaw_deg, 0.0, epsilon = 1e-12);
        assert_relative_eq!(angles.pitch_deg, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn error_classification() {
        assert!(GeometryError::TargetTooClose { distance: 0.0 }.is_domain());
        assert!(GeometryError::TargetBehindCamera { z: -1.0 }.is_domain());
        let range = GeometryError::AngleOutOfRange {
            yaw: 50.0,
            pitch: 0.0,
            bound: 45.0,
        };
        assert!(range.is_range());
        assert!(!range.is_domain());
    }
}
