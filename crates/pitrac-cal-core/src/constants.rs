//! Hardware constants for the global-shutter IMX296 camera modules and the
//! plausibility bounds applied to calibration results.

use crate::Real;

/// Physical sensor width in millimeters.
pub const SENSOR_WIDTH_MM: Real = 5.077365371;
/// Physical sensor height in millimeters.
pub const SENSOR_HEIGHT_MM: Real = 3.789078635;

/// Native sensor resolution (pixels).
pub const RESOLUTION_X: u32 = 1456;
pub const RESOLUTION_Y: u32 = 1088;

/// Golf ball radius in meters (42.67 mm diameter).
pub const BALL_RADIUS_M: Real = 0.021335;

/// Plausible lens focal length range in millimeters.
pub const MIN_FOCAL_LENGTH_MM: Real = 2.0;
pub const MAX_FOCAL_LENGTH_MM: Real = 50.0;

/// Largest plausible camera mounting angle (yaw or pitch), degrees.
pub const MAX_REASONABLE_ANGLE_DEG: Real = 45.0;

/// Below this camera-to-target distance the geometry is degenerate.
pub const MIN_TARGET_DISTANCE_M: Real = 1e-4;

/// Distance at which the expected ball radius is persisted for the tracker.
pub const EXPECTED_RADIUS_REFERENCE_DISTANCE_M: Real = 0.40;
