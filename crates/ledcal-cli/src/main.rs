use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledcal_pipeline::detect::{detect_frames_dir, write_detections, FlashSchedule};
use ledcal_pipeline::{run_calibration, CalibrationConfig};
use log::info;

/// LED rig calibration: detect strobed LEDs, then solve the rig.
#[derive(Debug, Parser)]
#[command(name = "ledcal", author, version, about = "LED rig calibration pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Solve the rig from `points/<c>.csv` under a capture root.
    Solve {
        /// Capture root holding `points/` and optionally `debug/`.
        #[arg(long)]
        root: PathBuf,

        /// Optional path to JSON CalibrationConfig. Defaults are used if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Detect one camera's LEDs in a directory of numbered frames.
    Detect {
        /// Directory of decoded frames named by frame index.
        #[arg(long)]
        frames: PathBuf,

        /// Detection table to write.
        #[arg(long)]
        output: PathBuf,

        /// Number of LEDs on the strand.
        #[arg(long, default_value_t = 50)]
        leds: usize,

        /// Capture frame rate.
        #[arg(long, default_value_t = 24.0)]
        frame_rate: f64,

        /// Save each LED frame with its spot marked into this directory.
        #[arg(long)]
        debug_dir: Option<PathBuf>,
    },
}

fn solve_from_files(root: &Path, config_path: Option<&Path>) -> Result<String> {
    let config = match config_path {
        Some(path) => CalibrationConfig::from_json_file(path)?,
        None => CalibrationConfig::default(),
    };
    let report = run_calibration(root, &config)?;
    Ok(serde_json::to_string_pretty(&report)?)
}

fn detect_to_file(
    frames: &Path,
    output: &Path,
    leds: usize,
    frame_rate: f64,
    debug_dir: Option<&Path>,
) -> Result<String> {
    let schedule = FlashSchedule {
        frame_rate,
        ..FlashSchedule::default()
    };
    let result = detect_frames_dir(frames, leds, &schedule, debug_dir)
        .with_context(|| format!("detection failed for {}", frames.display()))?;
    write_detections(output, &result.detections)?;
    info!("wrote {} detections to {}", result.detections.len(), output.display());
    Ok(serde_json::to_string_pretty(&result)?)
}

fn main() {
    env_logger::init();
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let json = match cli.command {
        Command::Solve { root, config } => solve_from_files(&root, config.as_deref())?,
        Command::Detect {
            frames,
            output,
            leds,
            frame_rate,
            debug_dir,
        } => detect_to_file(&frames, &output, leds, frame_rate, debug_dir.as_deref())?,
    };
    println!("{}", json);
    Ok(())
}
