//! Extrinsic calibration session: focal length and mounting angles from a
//! ball at a known position.
//!
//! Every detection yields one focal length sample. The primary camera
//! finalizes once `extrinsic_sample_target` samples are accepted. The strobed
//! secondary camera captures at most once per `strobed_interval` and
//! finalizes once `strobed_frame_budget` frames have been captured, provided
//! at least `strobed_min_valid` of them produced a valid sample.
//!
//! Finalization takes the mean focal length and computes the angles exactly
//! once from the most recent capture's detection. Any failure discards the
//! samples and returns to Preview.

use std::time::Duration;

use log::{error, info, warn};
use pitrac_cal_core::{
    angle_from_geometry, focal_length_mm, BallDetection, ExtrinsicResult, GeometryError,
    ImageSize, Real, ReferencePosition,
};
use thiserror::Error;

use crate::{
    AccumulatorError, BallDetector, CalibrationState, Command, ConfigStore, DetectionPolicy,
    FocalAccumulator, Flow, Frame, FrameSource, LogEntry, SessionConfig,
};

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum FinalizeError {
    #[error("captured {frames} frames but only {valid} valid ball detections (need >= {need})")]
    InsufficientValidSamples {
        frames: usize,
        valid: usize,
        need: usize,
    },
    #[error(transparent)]
    Samples(#[from] AccumulatorError),
    #[error("no ball in the last captured frame for angle computation")]
    MissingDetection,
    #[error("angle computation failed: {0}")]
    Geometry(#[from] GeometryError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtrinsicPhase {
    Preview,
    AutoCapturing {
        /// Frames captured during this attempt (strobed budget).
        frames: usize,
        /// Time of the last strobed capture of this attempt.
        last_capture: Option<Duration>,
    },
    Solved(ExtrinsicResult),
}

impl ExtrinsicPhase {
    pub fn state(&self) -> CalibrationState {
        match self {
            ExtrinsicPhase::Preview => CalibrationState::Preview,
            ExtrinsicPhase::AutoCapturing { .. } => CalibrationState::AutoCapturing,
            ExtrinsicPhase::Solved(_) => CalibrationState::Solved,
        }
    }
}

/// A ball detection together with the size of the frame it was found in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizedDetection {
    pub ball: BallDetection,
    pub frame_size: ImageSize,
}

/// The camera side of an extrinsic session: frame source plus ball detector.
pub struct BallCamera<'a> {
    pub source: &'a mut dyn FrameSource,
    pub detector: &'a mut dyn BallDetector,
}

impl BallCamera<'_> {
    /// Capture one frame and run the retry policy on it.
    pub fn capture(
        &mut self,
        policy: &DetectionPolicy,
    ) -> anyhow::Result<(Frame, Option<BallDetection>)> {
        let frame = self.source.capture()?;
        let detection = policy
            .detect(&mut *self.detector, &frame)
            .map(|hit| hit.detection);
        Ok((frame, detection))
    }
}

pub struct ExtrinsicSession {
    config: SessionConfig,
    policy: DetectionPolicy,
    position: ReferencePosition,
    distance_m: Real,
    accumulator: FocalAccumulator,
    phase: ExtrinsicPhase,
    /// Detection of the most recent capture; `None` if it missed.
    last_detection: Option<SizedDetection>,
    last_frame: Option<Frame>,
    last_result: Option<ExtrinsicResult>,
    log: Vec<LogEntry>,
}

impl ExtrinsicSession {
    /// Fails if `position` cannot describe a visible ball.
    pub fn new(config: SessionConfig, position: ReferencePosition) -> Result<Self, GeometryError> {
        position.validate()?;
        let distance_m = position.distance();
        info!(
            "{} ball position (x,y,z): ({:.3}, {:.3}, {:.3}) -> distance {:.3} m",
            config.camera, position.x, position.y, position.z, distance_m
        );
        Ok(Self {
            policy: config.detection_policy(),
            accumulator: FocalAccumulator::new(config.focal_range),
            config,
            position,
            distance_m,
            phase: ExtrinsicPhase::Preview,
            last_detection: None,
            last_frame: None,
            last_result: None,
            log: Vec::new(),
        })
    }

    /// Replace the detection retry policy.
    pub fn with_policy(mut self, policy: DetectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn policy(&self) -> &DetectionPolicy {
        &self.policy
    }

    pub fn phase(&self) -> &ExtrinsicPhase {
        &self.phase
    }

    pub fn state(&self) -> CalibrationState {
        self.phase.state()
    }

    pub fn sample_count(&self) -> usize {
        self.accumulator.len()
    }

    pub fn accumulator(&self) -> &FocalAccumulator {
        &self.accumulator
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn result(&self) -> Option<&ExtrinsicResult> {
        self.last_result.as_ref()
    }

    pub fn into_result(self) -> Option<ExtrinsicResult> {
        self.last_result
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.last_frame
    }

    fn focal_from(&self, ball: &BallDetection) -> Real {
        focal_length_mm(
            ball.radius,
            self.distance_m,
            self.config.sensor.width_mm,
            self.config.sensor.resolution_x,
            self.config.ball_radius_m,
        )
    }

    /// Whether this tick should capture a frame.
    ///
    /// The strobed camera never fires in Preview or Solved, and while
    /// auto-capturing waits `strobed_interval` between captures.
    pub fn wants_capture(&self, now: Duration) -> bool {
        if !self.config.strobed {
            return true;
        }
        match self.phase {
            ExtrinsicPhase::AutoCapturing { last_capture, .. } => last_capture
                .map_or(true, |t| now.saturating_sub(t) >= self.config.strobed_interval),
            ExtrinsicPhase::Preview | ExtrinsicPhase::Solved(_) => false,
        }
    }

    /// One loop iteration: capture if due, then update the state.
    ///
    /// Capture failures are logged and treated as a missed detection.
    pub fn on_tick(&mut self, now: Duration, camera: &mut BallCamera<'_>) -> Option<Frame> {
        if !self.wants_capture(now) {
            return None;
        }
        match camera.capture(&self.policy) {
            Ok((frame, detection)) => {
                self.on_capture(frame, detection, now);
                Some(frame)
            }
            Err(e) => {
                warn!("capture failed: {e:#}");
                None
            }
        }
    }

    /// State update for one captured frame.
    pub fn on_capture(&mut self, frame: Frame, detection: Option<BallDetection>, now: Duration) {
        self.record_capture(frame, detection);
        if let ExtrinsicPhase::AutoCapturing { frames, .. } = self.phase {
            self.auto_capturing_capture(frames, detection, now);
        }
    }

    fn record_capture(&mut self, frame: Frame, detection: Option<BallDetection>) {
        self.last_frame = Some(frame);
        self.last_detection = detection.map(|ball| SizedDetection {
            ball,
            frame_size: frame.size,
        });
    }

    fn auto_capturing_capture(
        &mut self,
        mut frames: usize,
        detection: Option<BallDetection>,
        now: Duration,
    ) {
        if self.config.strobed {
            frames += 1;
            self.phase = ExtrinsicPhase::AutoCapturing {
                frames,
                last_capture: Some(now),
            };
        }

        match detection {
            Some(ball) => {
                self.add_sample(&ball, "auto-sample");
            }
            None if self.config.strobed => warn!(
                "auto-capture frame {frames}/{} has no detectable ball",
                self.config.strobed_frame_budget
            ),
            None => {}
        }

        if !self.config.strobed {
            if self.accumulator.len() >= self.config.extrinsic_sample_target {
                self.finalize();
            }
            return;
        }

        if frames >= self.config.strobed_frame_budget {
            let valid = self.accumulator.len();
            if valid >= self.config.strobed_min_valid {
                if valid < self.config.strobed_frame_budget {
                    warn!("using {valid} valid samples from {frames} captured frames");
                }
                self.finalize();
            } else {
                self.fail(
                    "finalize",
                    FinalizeError::InsufficientValidSamples {
                        frames,
                        valid,
                        need: self.config.strobed_min_valid,
                    },
                );
            }
        }
    }

    /// Derive a focal length from `ball` and accumulate it if plausible.
    fn add_sample(&mut self, ball: &BallDetection, operation: &str) -> bool {
        let focal = self.focal_from(ball);
        match self.accumulator.push(focal) {
            Ok(count) => {
                info!(
                    "{operation} {count}/{}: radius={:.1} px, focal={:.4} mm (avg={:.4})",
                    self.config.extrinsic_sample_target,
                    ball.radius,
                    focal,
                    self.accumulator.running_mean().unwrap_or(focal)
                );
                true
            }
            Err(e) => {
                warn!("{e}, skipping");
                false
            }
        }
    }

    fn try_finalize(&self) -> Result<ExtrinsicResult, FinalizeError> {
        let focal_length_mm = self.accumulator.final_mean()?;
        let detection = self.last_detection.ok_or(FinalizeError::MissingDetection)?;
        let angles = angle_from_geometry(
            detection.ball.center,
            detection.frame_size,
            focal_length_mm,
            &self.position,
            &self.config.sensor,
        )?;
        Ok(ExtrinsicResult {
            focal_length_mm,
            angles,
            ball_radius_m: self.config.ball_radius_m,
        })
    }

    fn finalize(&mut self) {
        match self.try_finalize() {
            Ok(result) => {
                info!(
                    "extrinsic done: focal={:.4} mm, yaw={:.4}, pitch={:.4}",
                    result.focal_length_mm,
                    result.yaw_deg(),
                    result.pitch_deg()
                );
                self.log.push(LogEntry::success_with_notes(
                    "finalize",
                    format!("{} samples", self.accumulator.len()),
                ));
                self.last_result = Some(result);
                self.phase = ExtrinsicPhase::Solved(result);
            }
            Err(e) => self.fail("finalize", e),
        }
    }

    fn fail(&mut self, operation: &str, e: FinalizeError) {
        error!("{e}");
        self.log.push(LogEntry::failure(operation, e.to_string()));
        self.reset_attempt();
    }

    fn reset_attempt(&mut self) {
        self.accumulator.clear();
        self.phase = ExtrinsicPhase::Preview;
    }

    pub fn on_command(
        &mut self,
        command: Command,
        camera: &mut BallCamera<'_>,
        store: &mut dyn ConfigStore,
    ) -> Flow {
        match (self.phase.state(), command) {
            (CalibrationState::Preview, Command::Start) => {
                self.accumulator.clear();
                self.phase = ExtrinsicPhase::AutoCapturing {
                    frames: 0,
                    last_capture: None,
                };
                if self.config.strobed {
                    info!(
                        "auto-capture started: {} frames ({:.0}s apart), requiring >= {} valid samples",
                        self.config.strobed_frame_budget,
                        self.config.strobed_interval.as_secs_f64(),
                        self.config.strobed_min_valid
                    );
                } else {
                    info!(
                        "auto-capture started: collecting {} samples",
                        self.config.extrinsic_sample_target
                    );
                }
                self.log.push(LogEntry::success("start"));
            }
            (CalibrationState::Preview | CalibrationState::AutoCapturing, Command::Capture) => {
                self.manual_capture(camera);
            }
            (CalibrationState::AutoCapturing, Command::Cancel | Command::Quit) => {
                self.reset_attempt();
                info!("auto-capture cancelled");
                self.log.push(LogEntry::failure("auto-capture", "cancelled"));
            }
            (_, Command::Reset) => {
                self.reset_attempt();
                info!("reset all samples");
            }
            (CalibrationState::Solved, Command::Save) => {
                if let ExtrinsicPhase::Solved(result) = self.phase {
                    self.save(&result, store);
                }
            }
            (_, Command::Quit) => return Flow::Exit,
            _ => {}
        }
        Flow::Continue
    }

    fn manual_capture(&mut self, camera: &mut BallCamera<'_>) {
        // The strobed camera has no live stream: a manual capture fires it.
        if self.config.strobed {
            match camera.capture(&self.policy) {
                Ok((frame, detection)) => self.record_capture(frame, detection),
                Err(e) => {
                    warn!("capture failed: {e:#}");
                    self.last_detection = None;
                }
            }
        }

        let Some(detection) = self.last_detection else {
            warn!("no ball detected; place the ball at the calibration position");
            return;
        };
        self.add_sample(&detection.ball, "sample");
    }

    fn save(&mut self, result: &ExtrinsicResult, store: &mut dyn ConfigStore) {
        match store.save_extrinsics(self.config.camera, result) {
            Ok(backup) => {
                info!(
                    "saved {} extrinsic calibration (backup: {})",
                    self.config.camera,
                    backup.display()
                );
                self.log.push(LogEntry::success("save"));
            }
            Err(e) => {
                error!("saving extrinsic calibration failed: {e:#}");
                self.log.push(LogEntry::failure("save", format!("{e:#}")));
            }
        }
    }

    /// Status lines for the live display.
    pub fn status_lines(&self) -> Vec<String> {
        let detected = self.last_detection.is_some();
        let samples = self.accumulator.len();
        match &self.phase {
            ExtrinsicPhase::Preview => {
                let avg = self
                    .accumulator
                    .running_mean()
                    .map_or_else(|| "---".to_string(), |m| format!("{m:.4}"));
                vec![
                    format!("EXTRINSIC CALIBRATION  samples: {samples}  avg: {avg} mm"),
                    format!(
                        "Status: {}",
                        if detected { "BALL DETECTED" } else { "no ball" }
                    ),
                    "ENTER=start calibration  SPACE=sample  Q=quit".to_string(),
                ]
            }
            ExtrinsicPhase::AutoCapturing { frames, .. } => {
                let first = if self.config.strobed {
                    format!(
                        "AUTO-CAPTURING  frames: {frames}/{}  samples: {samples}/{}",
                        self.config.strobed_frame_budget, self.config.strobed_frame_budget
                    )
                } else {
                    format!(
                        "AUTO-CAPTURING  {samples}/{}",
                        self.config.extrinsic_sample_target
                    )
                };
                vec![
                    first,
                    if detected {
                        "BALL DETECTED".to_string()
                    } else {
                        "waiting for ball...".to_string()
                    },
                    "Q=cancel".to_string(),
                ]
            }
            ExtrinsicPhase::Solved(result) => vec![
                "EXTRINSIC COMPLETE".to_string(),
                format!("Focal length: {:.4} mm", result.focal_length_mm),
                format!(
                    "Angles: yaw={:.4}  pitch={:.4} deg",
                    result.yaw_deg(),
                    result.pitch_deg()
                ),
                "S=save  R=restart  Q=quit".to_string(),
            ],
        }
    }
}
