//! Intrinsic calibration from planar board views.
//!
//! The pipeline is the classic one:
//! normalized DLT homographies per view, Zhang's closed form for `K`, an
//! alternating linear Brown-Conrady fit and planar pose recovery, then a
//! Levenberg-Marquardt refinement of all of it against the observed pixels.
//!
//! [`PlanarIntrinsicsSolver`] wraps all of it behind a single `solve` call.

pub mod distortion_fit;
pub mod homography;
pub mod iterative_intrinsics;
pub mod planar_pose;
pub mod refine;
pub mod reprojection;
mod solver;
pub mod zhang_intrinsics;

pub use homography::{dlt_homography, HomographyError};
pub use planar_pose::estimate_planar_pose_from_h;
pub use refine::{refine_planar_camera, RefineOptions, RefinedCamera};
pub use reprojection::rms_reprojection_error;
pub use solver::*;
pub use zhang_intrinsics::{estimate_intrinsics_from_homographies, ZhangError};
