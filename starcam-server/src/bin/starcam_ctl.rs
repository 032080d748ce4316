//! Ground-side client for the star camera server.
//!
//! Connects, prints the telemetry it receives and optionally sends one
//! command built from the current state plus the flags given here.

use anyhow::{Context, Result};
use clap::Parser;
use starcam_proto::{
    blob_index, frame_len, Command, Telemetry, DEFAULT_PORT, SENSOR_HEIGHT, SENSOR_WIDTH,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Query and command a star camera server")]
struct Args {
    #[arg(long, default_value = "127.0.0.1", help = "Server host")]
    host: String,

    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT, help = "Server port")]
    port: u16,

    #[arg(long, default_value_t = SENSOR_WIDTH, help = "Frame width the server sends")]
    width: usize,

    #[arg(long, default_value_t = SENSOR_HEIGHT, help = "Frame height the server sends")]
    height: usize,

    #[arg(long, default_value = "1", help = "Telemetry messages to print")]
    count: usize,

    #[arg(long, help = "Odds ratio threshold")]
    odds: Option<f64>,

    #[arg(long, allow_hyphen_values = true, help = "Site latitude in degrees")]
    latitude: Option<f64>,

    #[arg(long, allow_hyphen_values = true, help = "Site longitude in degrees east")]
    longitude: Option<f64>,

    #[arg(long, help = "Site height in meters")]
    site_height: Option<f64>,

    #[arg(long, help = "Exposure in milliseconds")]
    exposure: Option<f64>,

    #[arg(long, help = "Absolute focus position")]
    focus: Option<i32>,

    #[arg(long, help = "Move focus to infinity")]
    focus_infinity: bool,

    #[arg(
        long,
        num_args = 3,
        value_names = ["START", "END", "STEP"],
        help = "Run an auto-focus sweep"
    )]
    sweep: Option<Vec<i32>>,

    #[arg(long, allow_hyphen_values = true, help = "Relative aperture steps")]
    aperture_steps: Option<i32>,

    #[arg(long, help = "Open the aperture fully")]
    max_aperture: bool,

    #[arg(long, help = "Build a hot pixel mask from the next frame")]
    make_hot_pixel_mask: bool,

    #[arg(long, help = "Detection threshold in standard deviations")]
    n_sigma: Option<f32>,

    #[arg(long, help = "Minimum spacing between stars in pixels")]
    star_spacing: Option<f32>,
}

impl Args {
    fn command(&self, current: &Telemetry) -> Option<Command> {
        let mut cmd = Command::hold(current);
        let mut changed = false;

        if let Some(odds) = self.odds {
            cmd.odds_threshold = odds;
            changed = true;
        }
        if let Some(latitude) = self.latitude {
            cmd.latitude = latitude;
            changed = true;
        }
        if let Some(longitude) = self.longitude {
            cmd.longitude = longitude;
            changed = true;
        }
        if let Some(height) = self.site_height {
            cmd.height = height;
            changed = true;
        }
        if let Some(exposure) = self.exposure {
            cmd.exposure = exposure;
            changed = true;
        }
        if let Some(focus) = self.focus {
            cmd.focus_position = focus as f32;
            changed = true;
        }
        if self.focus_infinity {
            cmd.set_focus_infinity = 1;
            changed = true;
        }
        if let Some(sweep) = &self.sweep {
            cmd.focus_mode = 1;
            cmd.start_focus_position = sweep[0];
            cmd.end_focus_position = sweep[1];
            cmd.focus_step = sweep[2];
            changed = true;
        }
        if let Some(steps) = self.aperture_steps {
            cmd.aperture_steps = steps;
            changed = true;
        }
        if self.max_aperture {
            cmd.set_max_aperture = 1;
            changed = true;
        }
        if self.make_hot_pixel_mask {
            cmd.make_hot_pixel_mask = 1;
            changed = true;
        }

        let mut blob_params = cmd.blob_params;
        if let Some(n_sigma) = self.n_sigma {
            blob_params[blob_index::N_SIGMA] = n_sigma;
            changed = true;
        }
        if let Some(spacing) = self.star_spacing {
            blob_params[blob_index::UNIQUE_STAR_SPACING] = spacing;
            changed = true;
        }
        cmd.blob_params = blob_params;

        changed.then_some(cmd)
    }
}

async fn read_telemetry(stream: &mut TcpStream, frame: &mut [u8]) -> Result<Telemetry> {
    let mut header = [0u8; Telemetry::SIZE];
    stream
        .read_exact(&mut header)
        .await
        .context("reading telemetry")?;
    stream.read_exact(frame).await.context("reading frame")?;
    Ok(Telemetry::from_bytes(&header)?)
}

fn print_telemetry(telemetry: &Telemetry, frame: &[u8]) {
    let astrometry = telemetry.astrometry;
    let camera = telemetry.camera;
    let blob = telemetry.blob;

    let (ra, dec, fr, ps) = (
        astrometry.ra,
        astrometry.dec,
        astrometry.field_rotation,
        astrometry.pixel_scale,
    );
    let (alt, az, ir, raw_time) = (
        astrometry.altitude,
        astrometry.azimuth,
        astrometry.image_rotation,
        astrometry.raw_time,
    );
    println!("solution   t={raw_time:.3} ra={ra:.5} dec={dec:.5} fr={fr:.3} ps={ps:.4}");
    println!("horizon    alt={alt:.4} az={az:.4} ir={ir:.3}");

    let (lat, lon, height, odds) = (
        astrometry.latitude,
        astrometry.longitude,
        astrometry.height,
        astrometry.odds_threshold,
    );
    println!("site       lat={lat} lon={lon} h={height} odds={odds:e}");

    let (exposure, focus, min, max) = (
        camera.exposure_time,
        camera.focus_position,
        camera.min_focus_position,
        camera.max_focus_position,
    );
    let (aperture, fault, mode) = (
        camera.current_aperture,
        camera.hardware_fault,
        camera.focus_mode,
    );
    println!(
        "camera     exposure={exposure}ms focus={focus} [{min}, {max}] f/{:.1} mode={mode} fault={fault}",
        aperture as f64 / 10.0
    );

    let (n_sigma, spacing, spike, r_smooth) = (
        blob.n_sigma,
        blob.unique_star_spacing,
        blob.spike_limit,
        blob.r_smooth,
    );
    println!("blob       n_sigma={n_sigma} spacing={spacing} spike={spike} r_smooth={r_smooth}");

    if !frame.is_empty() {
        let sum: u64 = frame.iter().map(|&p| p as u64).sum();
        let max = frame.iter().copied().max().unwrap_or(0);
        println!(
            "frame      {} bytes mean={:.2} max={}",
            frame.len(),
            sum as f64 / frame.len() as f64,
            max
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let mut stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    info!("Connected to {}", addr);

    let mut frame = vec![0u8; frame_len(args.width, args.height)];
    let mut telemetry = read_telemetry(&mut stream, &mut frame).await?;

    if let Some(cmd) = args.command(&telemetry) {
        stream
            .write_all(cmd.as_bytes())
            .await
            .context("sending command")?;
        info!("Sent command");
        telemetry = read_telemetry(&mut stream, &mut frame).await?;
    }

    print_telemetry(&telemetry, &frame);
    for _ in 1..args.count {
        telemetry = read_telemetry(&mut stream, &mut frame).await?;
        print_telemetry(&telemetry, &frame);
    }
    Ok(())
}
