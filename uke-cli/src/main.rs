//! # uke - Ukulele Tuner and Metronome
//!
//! Command-line front end for `uke-core`.
//!
//! ## Architecture
//! - **Main Thread**: parses arguments, then redraws a status line every
//!   100ms from the tools' snapshots
//! - **Worker Threads**: owned by `uke-core` (capture, playback, polling
//!   and scheduling tasks)

mod ui;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uke_core::{
    CpalCaptureDevice, CpalPlayback, Metronome, ToolsConfig, TunerStateMachine,
    config::BEATS_PER_BAR,
};
use ui::cent_meter::CentMeter;

/// How often the status line is refreshed.
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "uke", version, about = "Ukulele tuner and metronome")]
struct Cli {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen to the microphone and show the nearest string
    Tune {
        /// Stop after this many seconds
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
    /// Play a click track
    Metronome {
        /// Tempo, clamped to 40-240
        #[arg(long, allow_hyphen_values = true)]
        bpm: Option<i64>,
        /// Stop after this many seconds
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
    /// Print the effective configuration, or write it to a file
    Config {
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => ToolsConfig::load(path)?,
        None => ToolsConfig::default(),
    };

    match cli.command {
        Commands::Tune { seconds } => run_tuner(&config, Duration::from_secs(seconds)),
        Commands::Metronome { bpm, seconds } => run_metronome(&config, bpm, Duration::from_secs(seconds)),
        Commands::Config { write } => run_config(&config, write),
    }
}

/// Logs go to stderr so the status line on stdout stays readable.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_tuner(config: &ToolsConfig, duration: Duration) -> Result<()> {
    let mut tuner = TunerStateMachine::new(CpalCaptureDevice::new(), &config.tuner);
    println!("{}", tuner.snapshot().status_text);

    if let Err(e) = tuner.start() {
        let snapshot = tuner.snapshot();
        println!("{}", snapshot.status_text);
        if let Some(message) = snapshot.error {
            println!("{message}");
        }
        return Err(e).context("starting the tuner");
    }

    let started = Instant::now();
    let mut stdout = std::io::stdout();
    while started.elapsed() < duration {
        thread::sleep(REDRAW_INTERVAL);
        let snapshot = tuner.snapshot();
        if let Some(message) = snapshot.error {
            println!();
            bail!("tuner stopped: {message}");
        }

        let note = snapshot.note.as_deref().unwrap_or("--");
        let cents = snapshot.note.as_ref().map(|_| snapshot.cents_deviation);
        let frequency = snapshot
            .frequency
            .map(|f| format!("{f:7.2} Hz"))
            .unwrap_or_else(|| "    --- Hz".into());
        print!(
            "\r{note:>2}  {:+6.1}c  {frequency}  {}  {:<20}",
            snapshot.cents_deviation,
            CentMeter::new(cents).render(),
            snapshot.status_text
        );
        stdout.flush()?;
    }

    tuner.stop();
    println!("\n{}", tuner.snapshot().status_text);
    Ok(())
}

fn run_metronome(config: &ToolsConfig, bpm: Option<i64>, duration: Duration) -> Result<()> {
    let device = CpalPlayback::new().context("opening the audio output")?;
    let mut metronome = Metronome::new(device, config.metronome, config.scheduler, &config.click);
    if let Some(bpm) = bpm {
        metronome.set_bpm(bpm)?;
    }
    info!(bpm = metronome.bpm(), "starting metronome");
    metronome.start().context("starting the metronome")?;

    let started = Instant::now();
    let mut stdout = std::io::stdout();
    while started.elapsed() < duration {
        thread::sleep(REDRAW_INTERVAL / 4);
        let state = metronome.state();
        if let Some(message) = &state.error {
            println!();
            bail!("metronome stopped: {message}");
        }
        print!("\r{}", ui::beat_display::render(&state, BEATS_PER_BAR));
        stdout.flush()?;
    }

    metronome.stop();
    println!();
    Ok(())
}

fn run_config(config: &ToolsConfig, write: Option<PathBuf>) -> Result<()> {
    match write {
        Some(path) => {
            config.save(&path)?;
            info!(path = %path.display(), "configuration written");
        }
        None => println!("{}", config.to_json()?),
    }
    Ok(())
}
