use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use pitrac_cal_core::{CameraId, ExtrinsicResult, IntrinsicResult};
use pitrac_cal_linear::PlanarIntrinsicsSolver;
use pitrac_cal_pipeline::replay::{
    Recording, ReplayBallDetector, ReplayCornerDetector, ReplaySource, ScriptedOperator,
};
use pitrac_cal_pipeline::{
    open_extrinsic_session, run_extrinsic, run_full, run_intrinsic, BallCamera, BoardCamera,
    Clock, IntrinsicSession, JsonConfigStore, LogPresenter, SessionConfig, SessionIo,
    SimulatedClock, SystemClock,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    /// Board-based lens calibration.
    Intrinsic,
    /// Ball-based focal length and mounting angles.
    Extrinsic,
    /// Intrinsic, then extrinsic.
    Full,
}

/// Calibrate a PiTrac camera from a recorded capture.
#[derive(Debug, Parser)]
#[command(author, version, about = "PiTrac camera calibration")]
struct Args {
    /// Recorded capture (JSON: image size plus per-frame corners and ball).
    #[arg(long)]
    recording: PathBuf,

    /// Camera to calibrate.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    camera: u8,

    #[arg(long, value_enum, default_value_t = Mode::Full)]
    mode: Mode,

    /// golf_sim_config.json. Defaults to $PITRAC_ROOT/src/golf_sim_config.json.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persist solved results into the config file.
    #[arg(long)]
    save: bool,

    /// Strobed still capture (camera 2 only).
    #[arg(long)]
    strobed: bool,

    /// Give up after this many loop iterations per session.
    #[arg(long, default_value_t = 50_000)]
    max_ticks: usize,

    /// Replay at wall-clock pace instead of simulated time.
    #[arg(long)]
    realtime: bool,

    /// Debug logging.
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct Summary {
    camera: u8,
    mode: Mode,
    intrinsics: Option<IntrinsicResult>,
    extrinsics: Option<ExtrinsicResult>,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let summary = run(&args)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run(args: &Args) -> Result<Summary> {
    let camera = CameraId::from_number(args.camera)
        .with_context(|| format!("invalid camera number {}", args.camera))?;
    let config = SessionConfig::for_camera(camera, args.strobed);
    if args.strobed && !config.strobed {
        warn!("strobed capture only applies to camera 2; using live capture");
    }

    let config_path = JsonConfigStore::resolve_path(args.config.as_deref())?;
    let mut store = JsonConfigStore::load(&config_path)?.with_sensor(config.sensor);
    store.log_startup_coverage(camera);

    let recording = Rc::new(Recording::load(&args.recording)?);
    info!(
        "replaying {} frames of {} from {}",
        recording.frames.len(),
        recording.image_size,
        args.recording.display()
    );

    let mut operator = ScriptedOperator::new(args.save, args.max_ticks);
    let simulated = SimulatedClock::new(config.tick);
    let system = SystemClock::new();
    let clock: &dyn Clock = if args.realtime {
        operator = operator.paced();
        &system
    } else {
        &simulated
    };
    let mut presenter = LogPresenter::default();
    let mut io = SessionIo {
        operator: &mut operator,
        store: &mut store,
        clock,
        presenter: &mut presenter,
    };

    let mut board_source = ReplaySource::new(recording.clone());
    let mut corners = ReplayCornerDetector::new(recording.clone());
    let mut board = BoardCamera {
        source: &mut board_source,
        detector: &mut corners,
    };
    let mut ball_source = ReplaySource::new(recording.clone());
    let mut balls = ReplayBallDetector::new(recording);
    let mut ball = BallCamera {
        source: &mut ball_source,
        detector: &mut balls,
    };

    let (intrinsics, extrinsics) = match args.mode {
        Mode::Intrinsic => {
            let mut session = IntrinsicSession::new(config, PlanarIntrinsicsSolver::default());
            (run_intrinsic(&mut session, &mut board, &mut io)?, None)
        }
        Mode::Extrinsic => {
            let mut session = open_extrinsic_session(config, &*io.store)?;
            (None, run_extrinsic(&mut session, &mut ball, &mut io)?)
        }
        Mode::Full => {
            let outcome = run_full(
                config,
                PlanarIntrinsicsSolver::default(),
                &mut board,
                &mut ball,
                &mut io,
            )?;
            (outcome.intrinsics, outcome.extrinsics)
        }
    };

    Ok(Summary {
        camera: args.camera,
        mode: args.mode,
        intrinsics,
        extrinsics,
    })
}
