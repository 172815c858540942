//! Core math and geometry primitives for `pitrac-cal`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Pt2`, `Mat3`, ...),
//! - pinhole intrinsics and Brown-Conrady distortion models,
//! - sensor, rig and reference-position descriptions,
//! - the closed-form ball geometry used by extrinsic calibration ([`geometry`]),
//! - calibration result and observation types shared by the solver and the
//!   session state machine.
//!
//! Geometry pipeline for one ball detection:
//! `radius_px -> focal_mm`, `center_px -> offset_m -> camera angles`.

/// Reference pattern (ChArUco board) layout.
pub mod board;
/// Fixed hardware and plausibility constants.
pub mod constants;
/// Closed-form focal length, offset and angle computations.
pub mod geometry;
/// Linear algebra type aliases and helpers.
pub mod math;
/// Camera intrinsics, distortion and sensor models.
pub mod models;
/// Calibration rig types and reference positions.
pub mod rig;
/// Synthetic planar views for tests across the workspace.
pub mod synthetic;
/// Observation and result types.
pub mod types;

pub use board::*;
pub use geometry::*;
pub use math::*;
pub use models::*;
pub use rig::*;
pub use types::*;
