//! The cooperative session loop.
//!
//! One iteration: read the clock, capture + detect + update (`on_tick`),
//! present the status, poll the operator for up to one tick, apply the
//! command. The loop ends when a command returns [`Flow::Exit`]; the frame
//! source is always released afterwards.

use anyhow::{Context, Result};
use log::info;
use pitrac_cal_core::{ExtrinsicResult, IntrinsicResult};

use crate::{
    BallCamera, BoardCamera, Clock, ConfigStore, ExtrinsicPhase, ExtrinsicSession, Flow,
    IntrinsicSession, IntrinsicsSolver, Operator, Presenter, SessionConfig,
};

/// Operator-facing collaborators shared by every session of a run.
pub struct SessionIo<'a> {
    pub operator: &'a mut dyn Operator,
    pub store: &'a mut dyn ConfigStore,
    pub clock: &'a dyn Clock,
    pub presenter: &'a mut dyn Presenter,
}

/// Results of a full (intrinsic then extrinsic) run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullOutcome {
    pub intrinsics: Option<IntrinsicResult>,
    pub extrinsics: Option<ExtrinsicResult>,
}

/// Drive an intrinsic session until the operator exits.
///
/// Returns the last solved result, if any. A capture failure ends the
/// session with an error.
pub fn run_intrinsic<S: IntrinsicsSolver>(
    session: &mut IntrinsicSession<S>,
    camera: &mut BoardCamera<'_>,
    io: &mut SessionIo<'_>,
) -> Result<Option<IntrinsicResult>> {
    info!("starting intrinsic calibration ({})", session.config().camera);
    let outcome = intrinsic_loop(session, camera, io);
    camera.source.release();
    outcome.with_context(|| format!("{} intrinsic session", session.config().camera))?;
    Ok(session.result().cloned())
}

fn intrinsic_loop<S: IntrinsicsSolver>(
    session: &mut IntrinsicSession<S>,
    camera: &mut BoardCamera<'_>,
    io: &mut SessionIo<'_>,
) -> Result<()> {
    loop {
        let now = io.clock.now();
        let frame = session.on_tick(now, camera)?;
        io.presenter.present(&frame, &session.status_lines());

        let Some(command) = io.operator.poll(session.state(), session.config().tick) else {
            continue;
        };
        if session.on_command(command, now, &mut *io.store) == Flow::Exit {
            return Ok(());
        }
    }
}

/// Build an extrinsic session from the reference position stored for the
/// configured camera.
pub fn open_extrinsic_session(
    config: SessionConfig,
    store: &dyn ConfigStore,
) -> Result<ExtrinsicSession> {
    let camera = config.camera;
    let position = store
        .reference_position(camera)
        .with_context(|| format!("reading the {camera} calibration position"))?;
    ExtrinsicSession::new(config, position)
        .with_context(|| format!("invalid {camera} calibration position"))
}

/// Drive an extrinsic session until the operator exits.
///
/// Returns the result only if the session ended in Solved; a result that was
/// reset afterwards is dropped.
pub fn run_extrinsic(
    session: &mut ExtrinsicSession,
    camera: &mut BallCamera<'_>,
    io: &mut SessionIo<'_>,
) -> Result<Option<ExtrinsicResult>> {
    if session.config().strobed {
        info!(
            "starting extrinsic calibration ({}, strobed still capture)",
            session.config().camera
        );
    } else {
        info!(
            "starting extrinsic calibration ({}, live capture)",
            session.config().camera
        );
    }
    extrinsic_loop(session, camera, io);
    camera.source.release();
    match session.phase() {
        ExtrinsicPhase::Solved(result) => Ok(Some(*result)),
        _ => Ok(None),
    }
}

fn extrinsic_loop(
    session: &mut ExtrinsicSession,
    camera: &mut BallCamera<'_>,
    io: &mut SessionIo<'_>,
) {
    loop {
        let now = io.clock.now();
        session.on_tick(now, camera);
        if let Some(frame) = session.last_frame() {
            io.presenter.present(&frame, &session.status_lines());
        }

        let Some(command) = io.operator.poll(session.state(), session.config().tick) else {
            continue;
        };
        if session.on_command(command, camera, &mut *io.store) == Flow::Exit {
            return;
        }
    }
}

/// Intrinsic calibration followed by extrinsic calibration of the same camera.
///
/// The extrinsic session starts whether or not the intrinsic one produced a
/// result.
pub fn run_full<S: IntrinsicsSolver>(
    config: SessionConfig,
    solver: S,
    board: &mut BoardCamera<'_>,
    ball: &mut BallCamera<'_>,
    io: &mut SessionIo<'_>,
) -> Result<FullOutcome> {
    let mut intrinsic = IntrinsicSession::new(config.clone(), solver);
    let intrinsics = run_intrinsic(&mut intrinsic, board, io)?;

    let mut extrinsic = match open_extrinsic_session(config, &*io.store) {
        Ok(session) => session,
        Err(e) => {
            ball.source.release();
            return Err(e);
        }
    };
    let extrinsics = run_extrinsic(&mut extrinsic, ball, io)?;

    Ok(FullOutcome {
        intrinsics,
        extrinsics,
    })
}
