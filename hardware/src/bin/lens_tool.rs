//! Bench tool for the star camera lens adapter.
//!
//! Subcommands:
//! - `query`: print focus range, focus position and f-number
//! - `focus`: move focus to an absolute position or to infinity
//! - `aperture`: open fully or move by a number of motor steps
//! - `raw`: send one raw command and print the response

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hardware::birger::{BirgerLens, DEFAULT_BAUD};
use tracing::info;

/// Serial device the lens adapter usually enumerates as
const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

/// Star camera lens adapter control tool
#[derive(Parser, Debug)]
#[command(name = "lens_tool")]
#[command(about = "Query and move the star camera lens adapter")]
#[command(version)]
struct Args {
    /// Serial device of the lens adapter
    #[arg(long, global = true, default_value = DEFAULT_DEVICE)]
    device: String,

    /// Serial baud rate
    #[arg(long, global = true, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Re-learn the focus range before running the subcommand
    #[arg(long, global = true)]
    learn: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print focus range, focus position and f-number
    Query,

    /// Move focus
    Focus {
        /// Absolute encoder position
        #[arg(short, long, conflicts_with = "infinity")]
        position: Option<i32>,

        /// Drive to the infinity stop
        #[arg(long)]
        infinity: bool,
    },

    /// Move aperture
    Aperture {
        /// Relative motor steps (positive closes down)
        #[arg(short, long, allow_hyphen_values = true, conflicts_with = "open")]
        steps: Option<i32>,

        /// Open fully
        #[arg(long)]
        open: bool,
    },

    /// Send a raw adapter command
    Raw {
        /// Command text without the trailing carriage return
        command: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut lens = BirgerLens::open(&args.device, args.baud)
        .with_context(|| format!("opening lens adapter on {}", args.device))?;

    if args.learn {
        info!("Learning focus range");
        lens.learn_focus_range()?;
    }

    match args.command {
        Command::Query => {}
        Command::Focus { position, infinity } => match (position, infinity) {
            (_, true) => lens.focus_infinity()?,
            (Some(position), false) => lens.focus_absolute(position)?,
            (None, false) => bail!("focus needs --position or --infinity"),
        },
        Command::Aperture { steps, open } => match (steps, open) {
            (_, true) => lens.aperture_open()?,
            (Some(steps), false) => lens.aperture_steps(steps)?,
            (None, false) => bail!("aperture needs --steps or --open"),
        },
        Command::Raw { command } => {
            let response = lens.query(&command)?;
            println!("{response}");
            return Ok(());
        }
    }

    let state = lens.state()?;
    println!(
        "focus {} in [{}, {}], f/{:.1}",
        state.focus_position,
        state.min_focus_position,
        state.max_focus_position,
        state.f_number_x10 as f64 / 10.0
    );
    Ok(())
}
