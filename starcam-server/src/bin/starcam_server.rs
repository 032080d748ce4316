//! Star camera command/telemetry server.
//!
//! Opens the payload hardware and frame source, starts the solve loop on its
//! own thread and serves ground clients until SIGINT, SIGTERM or SIGHUP.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hardware::simulated::SimulatedPayload;
use hardware::{AppliedSettings, HardwareAdapter};
use starcam_proto::params::DEFAULT_EXPOSURE_MS;
use starcam_proto::{BlobParams, CameraParams};
use starcam_server::config::{
    solve_loop_config, HardwareArgs, ServerArgs, SiteArgs, SolverArgs, SourceArgs, SourceKind,
};
use starcam_server::extract::ThresholdExtractor;
use starcam_server::frame::{FrameSource, LatestFrame, RawFrameReplay, SimulatedSky, SIM_BEST_FOCUS};
use starcam_server::server::Server;
use starcam_server::sky::GeometricSkyTransform;
use starcam_server::solution_log::SolutionLog;
use starcam_server::solve_loop::SolveLoop;
use starcam_server::solver::{NullSolver, PlateSolver, SimulatedSolver};
use starcam_server::store::ConfigStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Where the simulated sky points (Orion's belt).
const SIM_POINTING: (f64, f64) = (83.8, -1.2);

#[derive(Parser, Debug)]
#[command(author, version, about = "Star camera command/telemetry server")]
struct Args {
    #[command(flatten)]
    server: ServerArgs,

    #[command(flatten)]
    site: SiteArgs,

    #[command(flatten)]
    solver: SolverArgs,

    #[command(flatten)]
    hardware: HardwareArgs,

    #[command(flatten)]
    source: SourceArgs,
}

fn open_hardware(args: &HardwareArgs, applied: AppliedSettings) -> Result<Box<dyn HardwareAdapter>> {
    let Some(port) = &args.lens_port else {
        info!("No lens adapter given, using simulated payload");
        return Ok(Box::new(SimulatedPayload::new(applied)));
    };

    #[cfg(feature = "birger")]
    {
        use hardware::birger::{BirgerLens, BirgerPayload};

        let lens = BirgerLens::open(port, args.lens_baud)
            .with_context(|| format!("opening lens adapter on {port}"))?;
        let payload = BirgerPayload::initialize(lens, applied)
            .context("initializing lens adapter")?;
        info!("Lens adapter ready on {}", port);
        Ok(Box::new(payload))
    }

    #[cfg(not(feature = "birger"))]
    {
        let _ = applied;
        anyhow::bail!("lens adapter {port} requested but built without the birger feature")
    }
}

fn open_source(
    args: &Args,
    applied: AppliedSettings,
) -> Result<(Box<dyn FrameSource>, Box<dyn PlateSolver>)> {
    let (width, height) = (args.server.width, args.server.height);
    match args.source.source {
        SourceKind::Simulated => {
            let pixel_scale = (args.solver.min_pixel_scale + args.solver.max_pixel_scale) / 2.0;
            let sky = SimulatedSky::new(
                width,
                height,
                SIM_POINTING,
                pixel_scale,
                applied,
                args.source.seed,
            );
            let solver = SimulatedSolver::new(sky.truth());
            info!("Simulated sky at RA {} Dec {}", SIM_POINTING.0, SIM_POINTING.1);
            Ok((Box::new(sky), Box::new(solver)))
        }
        SourceKind::Replay => {
            let dir = args
                .source
                .replay_dir
                .as_deref()
                .context("--replay-dir is required for replay")?;
            let replay = RawFrameReplay::open(dir, width, height, applied)
                .with_context(|| format!("opening replay directory {}", dir.display()))?;
            info!("Replaying {} frames from {}", replay.frame_count(), dir.display());
            Ok((Box::new(replay), Box::new(NullSolver)))
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let unix_signal = |kind: signal::unix::SignalKind, name: &'static str| async move {
        match signal::unix::signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install {} handler: {}", name, e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(signal::unix::SignalKind::terminate(), "SIGTERM");
    #[cfg(unix)]
    let hangup = unix_signal(signal::unix::SignalKind::hangup(), "SIGHUP");

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
        () = hangup => info!("Received SIGHUP"),
    }
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let applied = AppliedSettings::new(DEFAULT_EXPOSURE_MS, SIM_BEST_FOCUS);
    let adapter = open_hardware(&args.hardware, applied.clone())?;
    let store = Arc::new(ConfigStore::new(
        adapter,
        args.site.astrometry(),
        CameraParams::default(),
        BlobParams::default(),
    ));
    match store.sync_lens_state() {
        Ok(state) => info!("Lens at focus {} f/{:.1}", state.focus_position, state.f_number_x10 as f64 / 10.0),
        Err(e) => warn!("Could not read lens state: {}", e),
    }

    let (source, solver) = open_source(&args, applied)?;
    let latest = LatestFrame::new(args.server.width, args.server.height);

    let server = Server::bind(
        &args.server.bind_addr(),
        store.clone(),
        latest.clone(),
        args.server.session_config(),
    )
    .await
    .context("starting listener")?;

    let extractor = match &args.source.hot_pixel_mask {
        Some(path) => ThresholdExtractor::with_mask_file(path),
        None => ThresholdExtractor::new(),
    };
    info!("Static hot pixel mask holds {} pixels", extractor.hot_pixel_count());

    let cancel = CancellationToken::new();
    let mut solve_loop = SolveLoop::new(
        solve_loop_config(&args.server, &args.solver),
        store.clone(),
        latest,
        source,
        Box::new(extractor),
        solver,
        Box::new(GeometricSkyTransform::new(args.solver.dut1)),
        cancel.clone(),
    );
    if let Some(path) = &args.source.solution_log {
        let log = SolutionLog::open(path)
            .with_context(|| format!("opening solution log {}", path.display()))?;
        solve_loop = solve_loop.with_solution_log(log);
    }
    let solve_thread = solve_loop.spawn().context("starting solve loop thread")?;

    tokio::spawn(shutdown_signal(cancel.clone()));
    server.run(cancel.clone()).await;

    info!("Waiting for the solve loop to finish its iteration");
    let joined = tokio::task::spawn_blocking(move || solve_thread.join()).await?;
    if joined.is_err() {
        error!("Solve loop thread panicked");
    }

    store.release_hardware().context("releasing hardware")?;
    info!("Shutdown complete");
    Ok(())
}
