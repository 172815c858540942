//! Calibration workflow for the PiTrac cameras.
//!
//! This crate drives the interactive calibration of one camera at a time:
//!
//! - [`IntrinsicSession`]: accumulates board corner sets and hands them to an
//!   [`IntrinsicsSolver`] once enough views are collected.
//! - [`ExtrinsicSession`]: accumulates per-capture focal length estimates from
//!   ball detections, then computes the camera mounting angles.
//! - [`run_intrinsic`], [`run_extrinsic`], [`run_full`]: the single-threaded
//!   capture / detect / update / poll loop around a session.
//!
//! Hardware, detection primitives, persistence and the operator are reached
//! only through the traits in [`traits`], so every session can be driven from
//! recorded data ([`replay`]) or scripted test doubles.

mod accumulator;
mod config;
pub mod config_store;
mod extrinsic;
mod intrinsic;
pub mod replay;
mod retry;
mod runner;
mod session_log;
pub mod traits;

pub use accumulator::*;
pub use config::*;
pub use config_store::JsonConfigStore;
pub use extrinsic::*;
pub use intrinsic::*;
pub use retry::*;
pub use runner::*;
pub use session_log::*;
pub use traits::*;

/// Phase of a calibration session, shared by both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CalibrationState {
    Preview,
    AutoCapturing,
    Solved,
}

impl std::fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CalibrationState::Preview => "preview",
            CalibrationState::AutoCapturing => "auto-capturing",
            CalibrationState::Solved => "solved",
        };
        f.write_str(name)
    }
}

/// What the run loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}
