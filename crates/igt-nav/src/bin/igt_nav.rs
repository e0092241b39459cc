//! igt-nav CLI: offline grid planning and calibration checks.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;

use igt_nav::calib::{evaluate_fixed_point, CalibrationError};
use igt_nav::grid::{generate_lattice, GridPattern, GridSpec};
use igt_nav::NavigationConfig;
use log::info;
use nalgebra::Point3;
use serde::Serialize;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "igt-nav")]
#[command(about = "Insertion grid planning and tool calibration checks for catheter navigation")]
#[command(version)]
struct Cli {
    /// Log debug messages. With the `tracing` feature, `RUST_LOG` overrides
    /// this.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the points of an insertion grid as JSON.
    Grid(CliGridArgs),

    /// Evaluate fixed-point calibration samples.
    FixedPoint(CliFixedPointArgs),

    /// Write the default session configuration.
    InitConfig {
        /// Path of the JSON file to write.
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPattern {
    Rectangular,
    Triangular,
}

impl From<CliPattern> for GridPattern {
    fn from(p: CliPattern) -> Self {
        match p {
            CliPattern::Rectangular => GridPattern::Rectangular,
            CliPattern::Triangular => GridPattern::Triangular,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CliGridArgs {
    /// Session configuration to take the grid from (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pattern: Option<CliPattern>,

    /// Extent left of the origin in mm.
    #[arg(long)]
    left: Option<f64>,

    #[arg(long)]
    right: Option<f64>,

    #[arg(long)]
    up: Option<f64>,

    #[arg(long)]
    down: Option<f64>,

    /// Horizontal spacing in mm.
    #[arg(long)]
    horizontal: Option<f64>,

    /// Vertical spacing in mm.
    #[arg(long)]
    vertical: Option<f64>,
}

impl CliGridArgs {
    fn to_spec(&self) -> CliResult<GridSpec> {
        let mut spec = match &self.config {
            Some(path) => NavigationConfig::load_json(path)?.grid.to_spec(),
            None => GridSpec::default(),
        };
        if let Some(p) = self.pattern {
            spec.pattern = p.into();
        }
        let e = &mut spec.extents;
        for (field, arg) in [
            (&mut e.left, self.left),
            (&mut e.right, self.right),
            (&mut e.up, self.up),
            (&mut e.down, self.down),
        ] {
            if let Some(v) = arg {
                *field = v;
            }
        }
        if let Some(v) = self.horizontal {
            spec.spacing.horizontal = v;
        }
        if let Some(v) = self.vertical {
            spec.spacing.vertical = v;
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone, Args)]
struct CliFixedPointArgs {
    /// JSON array of [x, y, z] samples in mm.
    #[arg(long)]
    samples: PathBuf,

    /// Acceptance threshold on the RMSE in mm.
    #[arg(long, default_value = "5.0")]
    threshold: f64,
}

#[derive(Serialize)]
struct GridReport {
    count: usize,
    points: Vec<[f64; 2]>,
}

#[derive(Serialize)]
struct FixedPointReport {
    samples: usize,
    /// Only reported for accepted samples.
    centroid: Option<[f64; 3]>,
    rmse_mm: f64,
    accepted: bool,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Grid(args) => run_grid(&args),
        Commands::FixedPoint(args) => run_fixed_point(&args),
        Commands::InitConfig { out } => {
            NavigationConfig::default().write_json(&out)?;
            info!("default configuration written to {}", out.display());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) -> CliResult<()> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    #[cfg(feature = "tracing")]
    igt_nav::core::init_tracing(level, false);
    #[cfg(not(feature = "tracing"))]
    igt_nav::core::init_with_level(level)?;
    Ok(())
}

fn run_grid(args: &CliGridArgs) -> CliResult<()> {
    let spec = args.to_spec()?;
    let points = generate_lattice(&spec)?;
    info!("{:?} grid with {} points", spec.pattern, points.len());
    let report = GridReport {
        count: points.len(),
        points: points.iter().map(|p| [p.x, p.y]).collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_fixed_point(args: &CliFixedPointArgs) -> CliResult<()> {
    let raw = fs::read_to_string(&args.samples)?;
    let samples: Vec<[f64; 3]> = serde_json::from_str(&raw)?;
    let points: Vec<Point3<f64>> = samples.iter().map(|s| Point3::from(*s)).collect();

    let report = match evaluate_fixed_point(&points, args.threshold) {
        Ok(result) => FixedPointReport {
            samples: points.len(),
            centroid: Some([result.centroid.x, result.centroid.y, result.centroid.z]),
            rmse_mm: result.rmse_mm,
            accepted: true,
        },
        Err(CalibrationError::Rejected { rmse_mm }) => FixedPointReport {
            samples: points.len(),
            centroid: None,
            rmse_mm,
            accepted: false,
        },
        Err(e) => return Err(e.into()),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
