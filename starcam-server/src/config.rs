//! Command-line configuration shared by the server binaries.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use starcam_proto::params::{
    AstrometryParams, DEFAULT_ODDS_THRESHOLD, SITE_HEIGHT_M, SITE_LATITUDE_DEG,
    SITE_LONGITUDE_DEG,
};
use starcam_proto::{DEFAULT_PORT, SENSOR_HEIGHT, SENSOR_WIDTH};

use crate::session::SessionConfig;
use crate::solve_loop::SolveLoopConfig;

/// Listener, framing and sensor geometry.
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    #[arg(
        short = 'p',
        long,
        default_value_t = DEFAULT_PORT,
        help = "TCP command/telemetry port"
    )]
    pub port: u16,

    #[arg(
        short = 'b',
        long,
        default_value = "0.0.0.0",
        help = "Bind address",
        long_help = "IP address to bind the command/telemetry listener to. Use '0.0.0.0' to \
            accept ground clients on every interface, or '127.0.0.1' for local testing."
    )]
    pub bind_address: String,

    #[arg(
        long,
        default_value = "2500",
        help = "Command receive timeout in milliseconds",
        long_help = "How long each session waits for a command before sending telemetry \
            anyway. This also paces sessions whose client has stopped sending."
    )]
    pub recv_timeout_ms: u64,

    #[arg(long, default_value_t = SENSOR_WIDTH, help = "Sensor width in pixels")]
    pub width: usize,

    #[arg(long, default_value_t = SENSOR_HEIGHT, help = "Sensor height in pixels")]
    pub height: usize,

    #[arg(
        long,
        default_value = "500",
        help = "Delay before retrying a failed capture, in milliseconds"
    )]
    pub capture_retry_ms: u64,
}

impl ServerArgs {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            recv_timeout: Duration::from_millis(self.recv_timeout_ms),
        }
    }
}

/// Observing site defaults, overridden by the first operator command.
#[derive(Args, Debug, Clone)]
pub struct SiteArgs {
    #[arg(long, default_value_t = SITE_LATITUDE_DEG, allow_hyphen_values = true, help = "Site latitude in degrees")]
    pub latitude: f64,

    #[arg(long, default_value_t = SITE_LONGITUDE_DEG, allow_hyphen_values = true, help = "Site longitude in degrees east")]
    pub longitude: f64,

    #[arg(long, default_value_t = SITE_HEIGHT_M, help = "Site height in meters")]
    pub site_height: f64,

    #[arg(
        long,
        default_value_t = DEFAULT_ODDS_THRESHOLD,
        help = "Odds ratio a solution must reach to be accepted"
    )]
    pub odds: f64,
}

impl SiteArgs {
    pub fn astrometry(&self) -> AstrometryParams {
        AstrometryParams::at_site(self.latitude, self.longitude, self.site_height, self.odds)
    }
}

/// Plate solving limits.
#[derive(Args, Debug, Clone)]
pub struct SolverArgs {
    #[arg(long, default_value = "6.0", help = "Lowest plausible pixel scale (arcsec/px)")]
    pub min_pixel_scale: f64,

    #[arg(long, default_value = "6.5", help = "Highest plausible pixel scale (arcsec/px)")]
    pub max_pixel_scale: f64,

    #[arg(
        long,
        default_value = "1.0",
        help = "Search radius as a multiple of the field half diagonal",
        long_help = "When a previous solution exists, the solver only searches within this \
            many field half diagonals of it. The half diagonal is computed from the highest \
            plausible pixel scale."
    )]
    pub search_radius_factor: f64,

    #[arg(long, default_value = "4", help = "Minimum number of stars to attempt a solve")]
    pub min_stars: usize,

    #[arg(
        long,
        default_value = "-0.23",
        allow_hyphen_values = true,
        help = "UT1 - UTC in seconds"
    )]
    pub dut1: f64,
}

/// Lens adapter connection.
#[derive(Args, Debug, Clone)]
pub struct HardwareArgs {
    #[arg(
        long,
        help = "Serial device of the lens adapter",
        long_help = "Serial device of the Birger-style lens adapter. When omitted the server \
            runs against a simulated lens."
    )]
    pub lens_port: Option<String>,

    #[arg(long, default_value = "115200", help = "Lens adapter baud rate")]
    pub lens_baud: u32,
}

/// Where frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Synthetic star field with a known pointing
    Simulated,
    /// Replay previously recorded raw frames
    Replay,
}

/// Frame source and solution logging.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    #[arg(long, value_enum, default_value = "simulated", help = "Frame source")]
    pub source: SourceKind,

    #[arg(
        long,
        required_if_eq("source", "replay"),
        help = "Directory of *.raw frames to replay"
    )]
    pub replay_dir: Option<PathBuf>,

    #[arg(long, default_value = "7", help = "Seed for the simulated star field")]
    pub seed: u64,

    #[arg(long, help = "Append one row per accepted solution to this file")]
    pub solution_log: Option<PathBuf>,

    #[arg(
        long,
        help = "File holding the static hot pixel mask, reloaded at startup and rewritten when a new mask is made"
    )]
    pub hot_pixel_mask: Option<PathBuf>,
}

/// Build the solve loop configuration from parsed arguments.
pub fn solve_loop_config(server: &ServerArgs, solver: &SolverArgs) -> SolveLoopConfig {
    SolveLoopConfig {
        width: server.width,
        height: server.height,
        min_pixel_scale: solver.min_pixel_scale,
        max_pixel_scale: solver.max_pixel_scale,
        search_radius_factor: solver.search_radius_factor,
        min_stars: solver.min_stars,
        capture_retry: Duration::from_millis(server.capture_retry_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestArgs {
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

    #[test]
    fn test_defaults() {
        let args = TestArgs::parse_from(["test"]);
        assert_eq!(args.server.bind_addr(), "0.0.0.0:8000");
        assert_eq!(
            args.server.session_config().recv_timeout,
            Duration::from_millis(2500)
        );
        assert_eq!(args.server.width * args.server.height, 1936 * 1216);
        assert_eq!(args.source.source, SourceKind::Simulated);
        assert!(args.hardware.lens_port.is_none());
        assert!(args.source.hot_pixel_mask.is_none());
        assert_eq!(args.solver.dut1, -0.23);

        let astrometry = args.site.astrometry();
        let latitude = astrometry.latitude;
        assert_eq!(latitude, SITE_LATITUDE_DEG);

        let config = solve_loop_config(&args.server, &args.solver);
        assert_eq!(config.min_stars, 4);
        assert_eq!(config.max_pixel_scale, 6.5);
    }

    #[test]
    fn test_replay_requires_directory() {
        assert!(TestArgs::try_parse_from(["test", "--source", "replay"]).is_err());
        let args =
            TestArgs::try_parse_from(["test", "--source", "replay", "--replay-dir", "/tmp"])
                .unwrap();
        assert_eq!(args.source.replay_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_negative_longitude() {
        let args = TestArgs::parse_from(["test", "--longitude", "-120.5"]);
        assert_eq!(args.site.longitude, -120.5);
    }

    #[test]
    fn test_hot_pixel_mask_and_dut1() {
        let args = TestArgs::parse_from([
            "test",
            "--hot-pixel-mask",
            "/var/lib/starcam/hp_mask.txt",
            "--dut1",
            "0.1",
        ]);
        assert_eq!(
            args.source.hot_pixel_mask,
            Some(PathBuf::from("/var/lib/starcam/hp_mask.txt"))
        );
        assert_eq!(args.solver.dut1, 0.1);
    }
}
