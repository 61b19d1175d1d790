//! radarmap: convert a radar-coverage screenshot into a Web-Mercator
//! overlay.
//!
//! Reads the screenshot and the stencil, detects the rendering's center
//! and scale from its grid lines, reprojects it around the given earth
//! center and writes a cleaned PNG (and optionally a world file).
//!
//! # Usage
//!
//! ```text
//! radarmap [OPTIONS] <LON> <LAT> <SOURCE> <OUTPUT> <STENCIL>
//! ```
//!
//! Logging goes to stderr and is controlled through `RUST_LOG`
//! (default `radarmap=info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use radarmap_pipeline::diagnostics::{Clock, process_staged_with_diagnostics};
use radarmap_pipeline::{Coord, CropRect, PipelineConfig, ProcessingMode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reproject an azimuthal-equidistant radar screenshot into Web-Mercator.
#[derive(Parser)]
#[command(name = "radarmap", version)]
struct Cli {
    /// Longitude of the radar (projection center) in degrees.
    #[arg(allow_negative_numbers = true)]
    lon: f64,

    /// Latitude of the radar (projection center) in degrees.
    #[arg(allow_negative_numbers = true)]
    lat: f64,

    /// Screenshot to reproject (PNG, JPEG, BMP, WebP).
    source: PathBuf,

    /// Where to write the output PNG.
    output: PathBuf,

    /// Stencil image consulted during color cleanup.
    stencil: PathBuf,

    /// Full pipeline config as a JSON file.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    #[arg(long, conflicts_with = "config_json")]
    config: Option<PathBuf>,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    #[arg(long)]
    config_json: Option<String>,

    /// Pixels per radian of the source rendering at scale 1.0.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BASE_PIXELS_PER_RADIAN)]
    base_scale: f64,

    /// Output height in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_OUTPUT_HEIGHT, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    output_height: u32,

    /// Region of interest as X,Y,W,H.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CROP, conflicts_with = "no_crop")]
    crop: CropRect,

    /// Process the whole source image.
    #[arg(long)]
    no_crop: bool,

    /// Worker threads for the parallel sweeps (default: all cores).
    #[arg(long, conflicts_with = "sequential", value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    threads: Option<usize>,

    /// Run every sweep on the calling thread.
    #[arg(long)]
    sequential: bool,

    /// Fail instead of continuing when the grid cannot be detected.
    #[arg(long)]
    strict_calibration: bool,

    /// Paint the projected earth center into the output.
    #[arg(long)]
    mark_center: bool,

    /// Also write an ESRI world file (.pgw) next to the output.
    #[arg(long)]
    world_file: bool,

    /// Print the per-stage diagnostics report.
    #[arg(long)]
    report: bool,

    /// Print diagnostics as JSON instead of the human-readable report.
    #[arg(long)]
    json: bool,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// A config file or JSON string is used as-is. Otherwise the config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig> {
    if let Some(ref path) = cli.config {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        return serde_json::from_str(&json)
            .with_context(|| format!("parsing config {}", path.display()));
    }
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).context("parsing --config-json");
    }

    let processing = match (cli.sequential, cli.threads) {
        (true, _) => ProcessingMode::Sequential,
        (false, Some(n)) => ProcessingMode::ParallelWith(n),
        (false, None) => ProcessingMode::Parallel,
    };
    Ok(PipelineConfig {
        crop: (!cli.no_crop).then_some(cli.crop),
        base_pixels_per_radian: cli.base_scale,
        output_height: cli.output_height,
        processing,
        require_reliable_calibration: cli.strict_calibration,
        mark_center: cli.mark_center,
        ..PipelineConfig::default()
    })
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

fn load(path: &Path, what: &str) -> Result<radarmap_pipeline::RgbaImage> {
    radarmap_io::load_rgba(path).with_context(|| format!("loading {what} {}", path.display()))
}

fn run(cli: &Cli) -> Result<()> {
    let config = config_from_cli(cli)?;
    config.validate().context("invalid configuration")?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let earth_center = Coord {
        x: cli.lon,
        y: cli.lat,
    };
    tracing::info!(lon = cli.lon, lat = cli.lat, "earth center");

    let source = load(&cli.source, "source")?;
    let stencil = load(&cli.stencil, "stencil")?;

    let (staged, diagnostics) =
        process_staged_with_diagnostics(source, stencil, earth_center, &config, &StdClock)
            .context("processing failed")?;

    let min = staged.bounds.min();
    let max = staged.bounds.max();
    tracing::info!(
        min_x = min.x,
        min_y = min.y,
        max_x = max.x,
        max_y = max.y,
        "Mercator bounds",
    );

    radarmap_io::save_png(&cli.output, staged.final_image())
        .with_context(|| format!("writing {}", cli.output.display()))?;
    if cli.world_file {
        radarmap_io::save_world_file(&cli.output, &staged.bounds, staged.dimensions)
            .context("writing world file")?;
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    } else if cli.report {
        println!("{}", diagnostics.report());
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "radarmap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
