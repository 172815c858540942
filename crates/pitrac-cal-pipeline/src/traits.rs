//! Collaborator contracts consumed by the calibration sessions.
//!
//! Everything outside the calibration logic itself (camera transport, the
//! corner and ball detectors, the numerical solver, configuration persistence,
//! the operator and the wall clock) is reached through these traits.

use std::cell::Cell;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use pitrac_cal_core::{
    BallDetection, CameraId, CornerSet, ExtrinsicResult, ImageSize, IntrinsicResult, PlanarView,
    ReferencePosition,
};
use pitrac_cal_linear::{PlanarIntrinsicsSolver, SolveError};

use crate::{CalibrationState, DetectionPreset};

/// Handle to one captured image.
///
/// Pixel data stays with the source and its detectors; the sessions only need
/// the capture index and the frame dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub index: usize,
    pub size: ImageSize,
}

pub trait FrameSource {
    /// Block until the next frame is available.
    fn capture(&mut self) -> anyhow::Result<Frame>;

    /// Release hardware resources. Called once when a session ends.
    fn release(&mut self) {}
}

/// Reference-pattern corner detection.
pub trait CornerDetector {
    fn detect(&mut self, frame: &Frame) -> Option<CornerSet>;
}

/// Circular object (ball) detection with tunable sensitivity.
pub trait BallDetector {
    fn detect(&mut self, frame: &Frame, preset: &DetectionPreset) -> Option<BallDetection>;
}

/// Intrinsic parameter solver.
pub trait IntrinsicsSolver {
    /// Fails with [`SolveError::InsufficientData`] below 3 usable views.
    fn solve(
        &self,
        views: &[PlanarView],
        image_size: ImageSize,
    ) -> Result<IntrinsicResult, SolveError>;
}

impl IntrinsicsSolver for PlanarIntrinsicsSolver {
    fn solve(
        &self,
        views: &[PlanarView],
        image_size: ImageSize,
    ) -> Result<IntrinsicResult, SolveError> {
        PlanarIntrinsicsSolver::solve(self, views, image_size)
    }
}

/// Persisted rig configuration, as seen by the sessions.
///
/// `save_*` write the result and persist the file, returning the path of the
/// backup taken before overwriting.
pub trait ConfigStore {
    fn reference_position(&self, camera: CameraId) -> anyhow::Result<ReferencePosition>;

    fn save_intrinsics(
        &mut self,
        camera: CameraId,
        result: &IntrinsicResult,
    ) -> anyhow::Result<PathBuf>;

    fn save_extrinsics(
        &mut self,
        camera: CameraId,
        result: &ExtrinsicResult,
    ) -> anyhow::Result<PathBuf>;
}

/// Operator actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Begin auto-capture (Preview only).
    Start,
    /// Take one sample from the current frame.
    Capture,
    /// Solve from manually captured samples.
    Finalize,
    /// Abort auto-capture.
    Cancel,
    /// Cancel auto-capture, or end the session in any other state.
    Quit,
    /// Discard samples and return to Preview.
    Reset,
    /// Persist the solved result.
    Save,
    /// Toggle the undistorted preview of a solved intrinsic calibration.
    ToggleUndistort,
}

pub trait Operator {
    /// Wait up to `timeout` for the next command.
    fn poll(&mut self, state: CalibrationState, timeout: Duration) -> Option<Command>;
}

/// Monotonic time since the session loop started.
pub trait Clock {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Clock that advances by `step` on every reading.
///
/// The run loop reads the clock once per tick, so replayed sessions see the
/// same timing as a live loop running at `step` per iteration.
#[derive(Debug)]
pub struct SimulatedClock {
    now: Cell<Duration>,
    step: Duration,
}

impl SimulatedClock {
    pub fn new(step: Duration) -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            step,
        }
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Duration {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}

/// Live status output (the HUD of the calibration window).
pub trait Presenter {
    fn present(&mut self, frame: &Frame, status: &[String]);
}

/// Presenter that logs status lines when they change.
#[derive(Debug, Default)]
pub struct LogPresenter {
    last: Vec<String>,
}

impl Presenter for LogPresenter {
    fn present(&mut self, _frame: &Frame, status: &[String]) {
        if self.last.as_slice() != status {
            log::debug!("{}", status.join(" | "));
            self.last = status.to_vec();
        }
    }
}
