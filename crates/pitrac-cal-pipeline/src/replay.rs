//! Recorded-capture collaborators.
//!
//! A recording is a JSON file with the frame size and, per frame, the corner
//! set and ball circle a detector reported for it. Replaying it drives the
//! sessions exactly like a live camera, without hardware.

use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use pitrac_cal_core::{BallDetection, CornerSet, ImageSize, Pt2, Real};
use serde::{Deserialize, Serialize};

use crate::{
    BallDetector, CalibrationState, Command, CornerDetector, DetectionPreset, Frame, FrameSource,
    Operator,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedBall {
    pub center: Pt2,
    pub radius: Real,
    /// Presets that find this ball. Empty means every preset does.
    #[serde(default)]
    pub found_by: Vec<String>,
}

impl RecordedBall {
    pub fn found_with(&self, preset: &DetectionPreset) -> bool {
        self.found_by.is_empty() || self.found_by.iter().any(|name| *name == preset.name)
    }

    pub fn detection(&self) -> BallDetection {
        BallDetection {
            center: self.center,
            radius: self.radius,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    #[serde(default)]
    pub corners: Option<CornerSet>,
    #[serde(default)]
    pub ball: Option<RecordedBall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub image_size: ImageSize,
    pub frames: Vec<RecordedFrame>,
}

impl Recording {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading recording {}", path.display()))?;
        let recording: Recording = serde_json::from_str(&text)
            .with_context(|| format!("parsing recording {}", path.display()))?;
        ensure!(
            !recording.frames.is_empty(),
            "recording {} has no frames",
            path.display()
        );
        ensure!(
            !recording.image_size.is_empty(),
            "recording {} has an empty image size",
            path.display()
        );
        Ok(recording)
    }

    fn frame(&self, frame: &Frame) -> Option<&RecordedFrame> {
        if self.frames.is_empty() {
            return None;
        }
        self.frames.get(frame.index % self.frames.len())
    }
}

/// Frame source that cycles through the recorded frames.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    recording: Rc<Recording>,
    next: usize,
    released: bool,
}

impl ReplaySource {
    pub fn new(recording: Rc<Recording>) -> Self {
        Self {
            recording,
            next: 0,
            released: false,
        }
    }

    /// Number of frames captured so far.
    pub fn captured(&self) -> usize {
        self.next
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for ReplaySource {
    fn capture(&mut self) -> Result<Frame> {
        ensure!(!self.released, "frame source already released");
        ensure!(!self.recording.frames.is_empty(), "recording has no frames");
        let frame = Frame {
            index: self.next,
            size: self.recording.image_size,
        };
        self.next += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[derive(Debug, Clone)]
pub struct ReplayCornerDetector {
    recording: Rc<Recording>,
}

impl ReplayCornerDetector {
    pub fn new(recording: Rc<Recording>) -> Self {
        Self { recording }
    }
}

impl CornerDetector for ReplayCornerDetector {
    fn detect(&mut self, frame: &Frame) -> Option<CornerSet> {
        self.recording.frame(frame)?.corners.clone()
    }
}

/// Ball detector answering from the recording; a ball tagged with
/// `found_by` is only reported for those presets.
#[derive(Debug, Clone)]
pub struct ReplayBallDetector {
    recording: Rc<Recording>,
    attempts: usize,
}

impl ReplayBallDetector {
    pub fn new(recording: Rc<Recording>) -> Self {
        Self {
            recording,
            attempts: 0,
        }
    }

    /// Detection attempts made so far, over all presets.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl BallDetector for ReplayBallDetector {
    fn detect(&mut self, frame: &Frame, preset: &DetectionPreset) -> Option<BallDetection> {
        self.attempts += 1;
        let ball = self.recording.frame(frame)?.ball.as_ref()?;
        ball.found_with(preset).then(|| ball.detection())
    }
}

/// Unattended operator.
///
/// Commands scheduled for a tick are sent first. Otherwise it starts
/// auto-capture once per session, saves a solved result if asked to, and
/// quits once solved or after `max_ticks` polls of the current session. A
/// session that falls back to Preview is not restarted.
#[derive(Debug, Clone)]
pub struct ScriptedOperator {
    scheduled: VecDeque<(usize, Command)>,
    save: bool,
    saved: bool,
    auto_start: bool,
    started: bool,
    ticks: usize,
    session_ticks: usize,
    max_ticks: usize,
    paced: bool,
}

impl ScriptedOperator {
    pub fn new(save: bool, max_ticks: usize) -> Self {
        Self {
            scheduled: VecDeque::new(),
            save,
            saved: false,
            auto_start: true,
            started: false,
            ticks: 0,
            session_ticks: 0,
            max_ticks,
            paced: false,
        }
    }

    /// Wait out the poll timeout when there is nothing to send, like an
    /// operator watching a live window.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    /// Operator that only sends `commands` (tick index, command), then quits
    /// at `max_ticks`.
    pub fn with_commands(commands: Vec<(usize, Command)>, max_ticks: usize) -> Self {
        let mut scheduled: Vec<_> = commands;
        scheduled.sort_by_key(|(tick, _)| *tick);
        Self {
            scheduled: scheduled.into(),
            auto_start: false,
            ..Self::new(false, max_ticks)
        }
    }

    /// Polls across every session so far.
    pub fn ticks(&self) -> usize {
        self.ticks
    }

    fn end_session(&mut self) {
        self.started = false;
        self.saved = false;
        self.session_ticks = 0;
    }

    fn next_scheduled(&mut self) -> Option<Command> {
        let (tick, _) = self.scheduled.front()?;
        if *tick > self.ticks {
            return None;
        }
        self.scheduled.pop_front().map(|(_, command)| command)
    }
}

impl Operator for ScriptedOperator {
    fn poll(&mut self, state: CalibrationState, timeout: Duration) -> Option<Command> {
        let command = self.next_scheduled().or_else(|| {
            if self.session_ticks >= self.max_ticks {
                return Some(Command::Quit);
            }
            match state {
                CalibrationState::Preview if self.auto_start && !self.started => {
                    self.started = true;
                    Some(Command::Start)
                }
                CalibrationState::Solved if self.auto_start && self.save && !self.saved => {
                    self.saved = true;
                    Some(Command::Save)
                }
                CalibrationState::Solved if self.auto_start => Some(Command::Quit),
                _ => None,
            }
        });
        self.ticks += 1;
        // Quit only cancels auto-capture; anywhere else it ends the session.
        match command {
            Some(Command::Quit) if state != CalibrationState::AutoCapturing => self.end_session(),
            _ => self.session_ticks += 1,
        }
        if command.is_none() && self.paced {
            std::thread::sleep(timeout);
        }
        command
    }
}
