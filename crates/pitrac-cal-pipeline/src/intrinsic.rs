//! Intrinsic calibration session: `Preview -> AutoCapturing -> Solved`.
//!
//! Each state has its own handler. While auto-capturing, a corner set is
//! accepted at most once per `intrinsic_auto_interval`; reaching
//! `intrinsic_auto_count` samples invokes the solver. A failed solve discards
//! the samples and returns to Preview.

use std::time::Duration;

use anyhow::Context;
use log::{debug, error, info, warn};
use pitrac_cal_core::{CornerSet, ImageSize, IntrinsicResult};

use crate::{
    CalibrationState, Command, ConfigStore, CornerAccumulator, CornerDetector, Flow, Frame,
    FrameSource, IntrinsicsSolver, LogEntry, SessionConfig,
};

#[derive(Debug, Clone, PartialEq)]
pub enum IntrinsicPhase {
    Preview,
    AutoCapturing {
        /// Time of the last accepted sample of this attempt.
        last_capture: Option<Duration>,
    },
    Solved {
        result: IntrinsicResult,
        undistort: bool,
    },
}

impl IntrinsicPhase {
    pub fn state(&self) -> CalibrationState {
        match self {
            IntrinsicPhase::Preview => CalibrationState::Preview,
            IntrinsicPhase::AutoCapturing { .. } => CalibrationState::AutoCapturing,
            IntrinsicPhase::Solved { .. } => CalibrationState::Solved,
        }
    }
}

/// The camera side of an intrinsic session: frame source plus corner detector.
pub struct BoardCamera<'a> {
    pub source: &'a mut dyn FrameSource,
    pub detector: &'a mut dyn CornerDetector,
}

impl BoardCamera<'_> {
    pub fn capture(&mut self) -> anyhow::Result<(Frame, Option<CornerSet>)> {
        let frame = self.source.capture().context("capturing frame")?;
        let corners = self.detector.detect(&frame);
        Ok((frame, corners))
    }
}

pub struct IntrinsicSession<S> {
    config: SessionConfig,
    solver: S,
    accumulator: CornerAccumulator,
    phase: IntrinsicPhase,
    /// Frame and detection of the current tick, for manual capture.
    current: Option<(Frame, Option<CornerSet>)>,
    last_result: Option<IntrinsicResult>,
    log: Vec<LogEntry>,
}

impl<S: IntrinsicsSolver> IntrinsicSession<S> {
    pub fn new(config: SessionConfig, solver: S) -> Self {
        let accumulator = CornerAccumulator::new(config.board, config.min_corners);
        Self {
            config,
            solver,
            accumulator,
            phase: IntrinsicPhase::Preview,
            current: None,
            last_result: None,
            log: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> &IntrinsicPhase {
        &self.phase
    }

    pub fn state(&self) -> CalibrationState {
        self.phase.state()
    }

    pub fn sample_count(&self) -> usize {
        self.accumulator.len()
    }

    pub fn accumulator(&self) -> &CornerAccumulator {
        &self.accumulator
    }

    /// Operation log of this session.
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Most recent solved result, if any attempt succeeded.
    pub fn result(&self) -> Option<&IntrinsicResult> {
        self.last_result.as_ref()
    }

    pub fn into_result(self) -> Option<IntrinsicResult> {
        self.last_result
    }

    pub fn undistort_preview(&self) -> bool {
        matches!(self.phase, IntrinsicPhase::Solved { undistort: true, .. })
    }

    /// Capture one frame, detect corners and update the state.
    pub fn on_tick(
        &mut self,
        now: Duration,
        camera: &mut BoardCamera<'_>,
    ) -> anyhow::Result<Frame> {
        let (frame, corners) = camera.capture()?;
        self.on_frame(frame, corners, now);
        Ok(frame)
    }

    /// State update for one captured frame and its (optional) detection.
    pub fn on_frame(&mut self, frame: Frame, corners: Option<CornerSet>, now: Duration) {
        self.current = Some((frame, corners));
        match self.phase {
            IntrinsicPhase::Preview | IntrinsicPhase::Solved { .. } => {}
            IntrinsicPhase::AutoCapturing { last_capture } => {
                self.auto_capturing_frame(last_capture, now)
            }
        }
    }

    fn auto_capturing_frame(&mut self, last_capture: Option<Duration>, now: Duration) {
        let due = last_capture
            .map_or(true, |t| now.saturating_sub(t) >= self.config.intrinsic_auto_interval);
        if due && self.accept_current("auto-capture") {
            self.phase = IntrinsicPhase::AutoCapturing {
                last_capture: Some(now),
            };
        }

        if self.accumulator.len() >= self.config.intrinsic_auto_count {
            self.solve();
        }
    }

    /// Accumulate the current tick's corners. Returns whether a sample was added.
    fn accept_current(&mut self, operation: &str) -> bool {
        let Some((frame, Some(corners))) = &self.current else {
            return false;
        };
        match self.accumulator.push(frame.index, corners) {
            Ok(count) => {
                info!(
                    "{operation}: sample {count}/{} ({} corners, frame {})",
                    self.config.intrinsic_auto_count,
                    corners.len(),
                    frame.index
                );
                true
            }
            Err(e) => {
                debug!("{operation}: frame {} rejected: {e}", frame.index);
                false
            }
        }
    }

    fn image_size(&self) -> ImageSize {
        self.current
            .as_ref()
            .map(|(frame, _)| frame.size)
            .unwrap_or_else(|| self.config.sensor.resolution())
    }

    fn solve(&mut self) {
        let views = self.accumulator.views();
        match self.solver.solve(&views, self.image_size()) {
            Ok(result) => {
                info!(
                    "{} intrinsic calibration done: RMS={:.4} px",
                    self.config.camera, result.rms_error
                );
                self.log.push(LogEntry::success_with_notes(
                    "solve",
                    format!("{} views, rms {:.4} px", views.len(), result.rms_error),
                ));
                self.last_result = Some(result.clone());
                self.phase = IntrinsicPhase::Solved {
                    result,
                    undistort: false,
                };
            }
            Err(e) => {
                error!("calibration failed: {e}");
                self.log.push(LogEntry::failure("solve", e.to_string()));
                self.reset_attempt();
            }
        }
    }

    fn reset_attempt(&mut self) {
        self.accumulator.clear();
        self.phase = IntrinsicPhase::Preview;
    }

    pub fn on_command(
        &mut self,
        command: Command,
        now: Duration,
        store: &mut dyn ConfigStore,
    ) -> Flow {
        match self.phase.state() {
            CalibrationState::Preview => self.preview_command(command),
            CalibrationState::AutoCapturing => self.auto_capturing_command(command, now),
            CalibrationState::Solved => self.solved_command(command, store),
        }
    }

    fn preview_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Start => {
                self.accumulator.clear();
                self.phase = IntrinsicPhase::AutoCapturing { last_capture: None };
                info!(
                    "auto-capture started: {} frames, one every {:.0}s",
                    self.config.intrinsic_auto_count,
                    self.config.intrinsic_auto_interval.as_secs_f64()
                );
                self.log.push(LogEntry::success("start"));
            }
            Command::Capture => {
                self.manual_capture();
            }
            Command::Finalize => {
                if self.accumulator.len() >= self.config.intrinsic_manual_min {
                    self.solve();
                } else {
                    warn!(
                        "need at least {} captures to calibrate, have {}",
                        self.config.intrinsic_manual_min,
                        self.accumulator.len()
                    );
                }
            }
            Command::Reset => {
                self.reset_attempt();
                info!("reset all captures");
            }
            Command::Quit => return Flow::Exit,
            Command::Cancel | Command::Save | Command::ToggleUndistort => {}
        }
        Flow::Continue
    }

    fn auto_capturing_command(&mut self, command: Command, now: Duration) -> Flow {
        match command {
            Command::Cancel | Command::Quit => {
                self.reset_attempt();
                info!("auto-capture cancelled");
                self.log.push(LogEntry::failure("auto-capture", "cancelled"));
            }
            Command::Capture => {
                if self.manual_capture() {
                    self.phase = IntrinsicPhase::AutoCapturing {
                        last_capture: Some(now),
                    };
                }
            }
            Command::Reset => {
                self.reset_attempt();
                info!("reset all captures");
            }
            Command::Start | Command::Finalize | Command::Save | Command::ToggleUndistort => {}
        }
        Flow::Continue
    }

    fn solved_command(&mut self, command: Command, store: &mut dyn ConfigStore) -> Flow {
        let IntrinsicPhase::Solved { result, undistort } = &mut self.phase else {
            return Flow::Continue;
        };
        match command {
            Command::ToggleUndistort => *undistort = !*undistort,
            Command::Save => {
                let result = result.clone();
                self.save(&result, store);
            }
            Command::Reset | Command::Start => {
                info!("starting a new intrinsic attempt");
                self.reset_attempt();
            }
            Command::Quit => return Flow::Exit,
            Command::Capture | Command::Finalize | Command::Cancel => {}
        }
        Flow::Continue
    }

    fn manual_capture(&mut self) -> bool {
        let has_corners = matches!(self.current, Some((_, Some(_))));
        if !has_corners {
            warn!("no corners detected; move the board into view");
            return false;
        }
        self.accept_current("capture")
    }

    fn save(&mut self, result: &IntrinsicResult, store: &mut dyn ConfigStore) {
        match store.save_intrinsics(self.config.camera, result) {
            Ok(backup) => {
                info!(
                    "saved {} intrinsic calibration (backup: {})",
                    self.config.camera,
                    backup.display()
                );
                self.log.push(LogEntry::success("save"));
            }
            Err(e) => {
                error!("saving intrinsic calibration failed: {e:#}");
                self.log.push(LogEntry::failure("save", format!("{e:#}")));
            }
        }
    }

    /// Status lines for the live display.
    pub fn status_lines(&self) -> Vec<String> {
        let corners_found = matches!(self.current, Some((_, Some(_))));
        match &self.phase {
            IntrinsicPhase::Preview => vec![
                format!(
                    "INTRINSIC CALIBRATION  captures: {}",
                    self.accumulator.len()
                ),
                format!(
                    "Status: {}",
                    if corners_found {
                        "CORNERS DETECTED"
                    } else {
                        "no corners"
                    }
                ),
                "ENTER=start calibration  SPACE=capture  C=calibrate  Q=quit".to_string(),
            ],
            IntrinsicPhase::AutoCapturing { .. } => vec![
                format!(
                    "AUTO-CAPTURING  {}/{}",
                    self.accumulator.len(),
                    self.config.intrinsic_auto_count
                ),
                format!(
                    "{}  --  move board around slowly",
                    if corners_found {
                        "CORNERS DETECTED"
                    } else {
                        "waiting for board..."
                    }
                ),
                "Q=cancel".to_string(),
            ],
            IntrinsicPhase::Solved { result, undistort } => vec![
                format!("CALIBRATION COMPLETE  RMS={:.4} px", result.rms_error),
                format!(
                    "Undistort preview: {}",
                    if *undistort { "ON" } else { "OFF" }
                ),
                "U=undistort  S=save  R=restart  Q=quit/next".to_string(),
            ],
        }
    }
}
