//! Extrinsic session: sample acceptance, strobed frame budget, finalization.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use approx::assert_relative_eq;
use pitrac_cal_core::{
    angle_from_geometry, BallDetection, CameraId, ExtrinsicResult, GeometryError, ImageSize,
    IntrinsicResult, Real, ReferencePosition, SensorSpec,
};
use pitrac_cal_pipeline::{
    BallCamera, BallDetector, CalibrationState, Command, ConfigStore, DetectionPolicy,
    DetectionPreset, ExtrinsicPhase, ExtrinsicSession, Frame, FrameSource, SessionConfig,
};

const SIZE: ImageSize = ImageSize {
    width: 1456,
    height: 1088,
};

struct CountingSource {
    next: usize,
}

impl FrameSource for CountingSource {
    fn capture(&mut self) -> anyhow::Result<Frame> {
        let frame = Frame {
            index: self.next,
            size: SIZE,
        };
        self.next += 1;
        Ok(frame)
    }
}

/// Ball per frame index, found only by the named preset (or by all presets).
#[derive(Default)]
struct ScriptedBalls {
    hits: HashMap<usize, (BallDetection, Option<&'static str>)>,
}

impl ScriptedBalls {
    fn on(mut self, frames: &[usize], ball: BallDetection) -> Self {
        for &i in frames {
            self.hits.insert(i, (ball, None));
        }
        self
    }

    fn only_for(mut self, frame: usize, ball: BallDetection, preset: &'static str) -> Self {
        self.hits.insert(frame, (ball, Some(preset)));
        self
    }
}

impl BallDetector for ScriptedBalls {
    fn detect(&mut self, frame: &Frame, preset: &DetectionPreset) -> Option<BallDetection> {
        let (ball, only) = self.hits.get(&frame.index)?;
        match only {
            Some(name) if *name != preset.name => None,
            _ => Some(*ball),
        }
    }
}

#[derive(Default)]
struct MemoryStore {
    extrinsic_saves: Vec<ExtrinsicResult>,
}

impl ConfigStore for MemoryStore {
    fn reference_position(&self, _camera: CameraId) -> anyhow::Result<ReferencePosition> {
        Ok(position())
    }

    fn save_intrinsics(
        &mut self,
        _camera: CameraId,
        _result: &IntrinsicResult,
    ) -> anyhow::Result<PathBuf> {
        bail!("not expected")
    }

    fn save_extrinsics(
        &mut self,
        _camera: CameraId,
        result: &ExtrinsicResult,
    ) -> anyhow::Result<PathBuf> {
        self.extrinsic_saves.push(*result);
        Ok(PathBuf::from("backup.json"))
    }
}

fn position() -> ReferencePosition {
    ReferencePosition::new(-0.05, -0.1, 0.45)
}

/// Unrounded ball radius a lens of `focal_mm` sees at the reference position.
fn radius_for(focal_mm: Real) -> Real {
    let sensor = SensorSpec::default();
    focal_mm * 0.021335 * sensor.resolution_x as Real / (position().distance() * sensor.width_mm)
}

fn ball(focal_mm: Real) -> BallDetection {
    BallDetection::new(800.0, 500.0, radius_for(focal_mm))
}

fn frame(index: usize) -> Frame {
    Frame { index, size: SIZE }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn primary_session() -> ExtrinsicSession {
    ExtrinsicSession::new(SessionConfig::for_camera(CameraId::One, false), position()).unwrap()
}

fn strobed_session() -> ExtrinsicSession {
    ExtrinsicSession::new(SessionConfig::for_camera(CameraId::Two, true), position()).unwrap()
}

fn start(session: &mut ExtrinsicSession, source: &mut CountingSource, balls: &mut ScriptedBalls) {
    let mut camera = BallCamera {
        source,
        detector: balls,
    };
    session.on_command(Command::Start, &mut camera, &mut MemoryStore::default());
}

#[test]
fn primary_camera_finalizes_after_sample_target() {
    let mut session = primary_session();
    let mut source = CountingSource { next: 0 };
    let mut balls = ScriptedBalls::default();
    start(&mut session, &mut source, &mut balls);

    let focals = [5.9, 6.0, 6.1, 6.0, 5.95, 6.05];
    for (i, f) in focals.iter().enumerate() {
        assert_eq!(session.state(), CalibrationState::AutoCapturing);
        session.on_capture(frame(i), Some(ball(*f)), secs(i as u64));
    }

    assert_eq!(session.state(), CalibrationState::Solved);
    let result = *session.result().unwrap();
    assert_relative_eq!(result.focal_length_mm, 6.0, max_relative = 1e-9);

    let expected = angle_from_geometry(
        ball(6.05).center,
        SIZE,
        result.focal_length_mm,
        &position(),
        &SensorSpec::default(),
    )
    .unwrap();
    assert_relative_eq!(result.yaw_deg(), expected.yaw_deg, epsilon = 1e-12);
    assert_relative_eq!(result.pitch_deg(), expected.pitch_deg, epsilon = 1e-12);
}

#[test]
fn implausible_focal_length_is_not_accumulated() {
    let mut session = primary_session();
    let mut source = CountingSource { next: 0 };
    let mut balls = ScriptedBalls::default();
    start(&mut session, &mut source, &mut balls);

    session.on_capture(frame(0), Some(ball(6.0)), secs(0));
    session.on_capture(frame(1), Some(ball(80.0)), secs(1));
    session.on_capture(frame(2), Some(ball(1.0)), secs(2));

    assert_eq!(session.sample_count(), 1);
    assert_eq!(session.state(), CalibrationState::AutoCapturing);
    assert_relative_eq!(
        session.accumulator().running_mean().unwrap(),
        6.0,
        max_relative = 1e-12
    );
}

#[test]
fn cancel_discards_samples() {
    let mut session = primary_session();
    let mut source = CountingSource { next: 0 };
    let mut balls = ScriptedBalls::default();
    start(&mut session, &mut source, &mut balls);
    session.on_capture(frame(0), Some(ball(6.0)), secs(0));
    session.on_capture(frame(1), Some(ball(6.0)), secs(1));

    let mut camera = BallCamera {
        source: &mut source,
        detector: &mut balls,
    };
    session.on_command(Command::Cancel, &mut camera, &mut MemoryStore::default());
    assert_eq!(session.state(), CalibrationState::Preview);
    assert_eq!(session.sample_count(), 0);
}

#[test]
fn manual_capture_uses_the_latest_detection() {
    let mut session = primary_session();
    let mut source = CountingSource { next: 0 };
    let mut balls = ScriptedBalls::default().on(&[0], ball(6.0));
    let mut store = MemoryStore::default();

    let mut camera = BallCamera {
        source: &mut source,
        detector: &mut balls,
    };
    session.on_tick(secs(0), &mut camera);
    session.on_command(Command::Capture, &mut camera, &mut store);
    assert_eq!(session.sample_count(), 1);

    // Frame 1 has no ball: capture is refused.
    session.on_tick(secs(1), &mut camera);
    session.on_command(Command::Capture, &mut camera, &mut store);
    assert_eq!(session.sample_count(), 1);
    assert_eq!(session.state(), CalibrationState::Preview);
}

#[test]
fn invalid_reference_position_is_rejected() {
    let config = SessionConfig::for_camera(CameraId::One, false);
    let err = ExtrinsicSession::new(config.clone(), ReferencePosition::new(0.1, 0.0, -0.5))
        .err()
        .unwrap();
    assert!(matches!(err, GeometryError::TargetBehindCamera { .. }));
    assert!(err.is_domain());

    let err = ExtrinsicSession::new(config, ReferencePosition::new(0.0, 0.0, 0.0))
        .err()
        .unwrap();
    assert!(matches!(err, GeometryError::TargetTooClose { .. }));
}

#[test]
fn strobed_camera_waits_for_start_and_interval() {
    let mut session = strobed_session();
    let mut source = CountingSource { next: 0 };
    let mut balls = ScriptedBalls::default();

    assert!(!session.wants_capture(secs(0)));
    {
        let mut camera = BallCamera {
            source: &mut source,
            detector: &mut balls,
        };
        assert!(session.on_tick(secs(0), &mut camera).is_none());
    }
    assert_eq!(source.next, 0, "no strobe while previewing");

    start(&mut session, &mut source, &mut balls);
    let mut camera = BallCamera {
        source: &mut source,
        detector: &mut balls,
    };
    assert!(session.on_tick(secs(10), &mut camera).is_some());
    assert!(session.on_tick(secs(12), &mut camera).is_none());
    assert!(session.on_tick(secs(15), &mut camera).is_some());
    assert!(matches!(
        session.phase(),
        ExtrinsicPhase::AutoCapturing { frames: 2, .. }
    ));
}

/// Drive six strobed captures, five seconds apart.
fn run_strobed_budget(session: &mut ExtrinsicSession, balls: &mut ScriptedBalls) -> CountingSource {
    let mut source = CountingSource { next: 0 };
    start(session, &mut source, balls);
    let mut camera = BallCamera {
        source: &mut source,
        detector: balls,
    };
    for i in 0..6 {
        session.on_tick(secs(5 * i), &mut camera);
    }
    source
}

#[test]
fn strobed_budget_with_too_few_valid_samples_fails() {
    let mut session = strobed_session();
    let mut balls = ScriptedBalls::default().on(&[1, 4], ball(6.0));

    let source = run_strobed_budget(&mut session, &mut balls);

    assert_eq!(source.next, 6);
    assert_eq!(session.state(), CalibrationState::Preview);
    assert_eq!(session.sample_count(), 0);
    assert!(session.result().is_none());
    let last = session.log().last().unwrap();
    assert!(!last.success);
    let notes = last.notes.as_deref().unwrap_or_default();
    assert!(notes.contains("only 2 valid"), "{notes}");
}

#[test]
fn strobed_budget_needs_a_ball_in_the_final_frame() {
    let mut session = strobed_session();
    let mut balls = ScriptedBalls::default().on(&[0, 1, 2, 3], ball(6.0));

    run_strobed_budget(&mut session, &mut balls);

    assert_eq!(session.state(), CalibrationState::Preview);
    assert_eq!(session.sample_count(), 0);
    let notes = session.log().last().unwrap().notes.clone().unwrap_or_default();
    assert!(notes.contains("no ball"), "{notes}");
}

#[test]
fn strobed_budget_finalizes_with_fallback_detections() {
    let mut session = strobed_session();
    let mut balls = ScriptedBalls::default()
        .on(&[0, 2, 5], ball(6.0))
        .only_for(3, ball(6.2), "strobed-permissive");
    let mut store = MemoryStore::default();

    let mut source = run_strobed_budget(&mut session, &mut balls);

    assert_eq!(session.state(), CalibrationState::Solved);
    let result = *session.result().unwrap();
    assert_relative_eq!(result.focal_length_mm, 6.05, max_relative = 1e-9);

    let mut camera = BallCamera {
        source: &mut source,
        detector: &mut balls,
    };
    session.on_command(Command::Save, &mut camera, &mut store);
    assert_eq!(store.extrinsic_saves, vec![result]);
}

#[test]
fn strobed_manual_capture_fires_its_own_capture() {
    let mut session = strobed_session();
    let mut source = CountingSource { next: 0 };
    let mut balls = ScriptedBalls::default().on(&[0], ball(6.0));

    let mut camera = BallCamera {
        source: &mut source,
        detector: &mut balls,
    };
    session.on_command(Command::Capture, &mut camera, &mut MemoryStore::default());

    assert_eq!(source.next, 1);
    assert_eq!(session.sample_count(), 1);
    assert_eq!(session.state(), CalibrationState::Preview);
}

#[test]
fn custom_policy_adds_a_fallback_preset() {
    let policy = DetectionPolicy::standard().with_fallback(DetectionPreset::strobed_permissive());
    let mut session = primary_session().with_policy(policy);
    assert_eq!(session.policy().len(), 2);

    let mut source = CountingSource { next: 0 };
    let mut balls = ScriptedBalls::default().only_for(0, ball(6.0), "strobed-permissive");
    let mut camera = BallCamera {
        source: &mut source,
        detector: &mut balls,
    };
    session.on_tick(secs(0), &mut camera);
    session.on_command(Command::Capture, &mut camera, &mut MemoryStore::default());
    assert_eq!(session.sample_count(), 1);
}

#[test]
fn out_of_bound_angle_resets_to_preview() {
    // Reference 59 degrees off the mechanical axis, ball seen dead center.
    let off_axis = ReferencePosition::new(0.5, 0.0, 0.3);
    let mut session =
        ExtrinsicSession::new(SessionConfig::for_camera(CameraId::One, false), off_axis).unwrap();
    let mut source = CountingSource { next: 0 };
    let mut balls = ScriptedBalls::default();
    start(&mut session, &mut source, &mut balls);

    let sensor = SensorSpec::default();
    let radius =
        6.0 * 0.021335 * sensor.resolution_x as Real / (off_axis.distance() * sensor.width_mm);
    let centered = BallDetection::new(728.0, 544.0, radius);
    for i in 0..6 {
        session.on_capture(frame(i), Some(centered), secs(i as u64));
    }

    assert_eq!(session.state(), CalibrationState::Preview);
    assert_eq!(session.sample_count(), 0);
    assert!(session.result().is_none());
    let last = session.log().last().unwrap();
    assert_eq!(last.operation, "finalize");
    assert!(!last.success);
    let notes = last.notes.as_deref().unwrap_or_default();
    assert!(notes.contains("exceed"), "{notes}");
}

#[test]
fn empty_sample_set_resets_to_preview() {
    let mut config = SessionConfig::for_camera(CameraId::Two, true);
    config.strobed_min_valid = 0;
    let mut session = ExtrinsicSession::new(config, position()).unwrap();
    let mut balls = ScriptedBalls::default();

    run_strobed_budget(&mut session, &mut balls);

    assert_eq!(session.state(), CalibrationState::Preview);
    assert_eq!(session.sample_count(), 0);
    assert!(session.result().is_none());
    let last = session.log().last().unwrap();
    assert_eq!(last.operation, "finalize");
    assert!(!last.success);
    let notes = last.notes.as_deref().unwrap_or_default();
    assert!(notes.contains("no samples accumulated"), "{notes}");
}
