//! coverage-fetch CLI
//!
//! Downloads one raster coverage tile per polygon bounding box from a WCS
//! endpoint, in parallel and resumably.

mod commands;
mod error;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use env_logger::{Builder, Target};
use log::LevelFilter;
use owo_colors::OwoColorize;
use owo_colors::Stream::Stdout;

use crate::error::EXIT_INTERRUPTED;

#[derive(Parser)]
#[command(name = "coverage-fetch")]
#[command(about = "Download raster coverage tiles for polygon bounding boxes", long_about = None)]
struct Cli {
    /// Show per-request detail
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one tile per polygon into an output directory
    Fetch(FetchArgs),

    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for the fetch command. Unset options fall back to environment
/// variables, then the settings file, then built-in defaults.
#[derive(Args, Clone, Debug)]
struct FetchArgs {
    /// CSV of polygon bounds with minx,miny,maxx,maxy columns (index optional)
    input: PathBuf,

    /// Directory for downloaded tiles and the failure report
    output_dir: PathBuf,

    /// Number of parallel workers [default: 4]
    #[arg(short, long, allow_negative_numbers = true)]
    workers: Option<i64>,

    /// Seconds each worker waits between requests [default: 0.5]
    #[arg(short, long, allow_negative_numbers = true)]
    sleep: Option<f64>,

    /// Output resolution in meters per pixel [default: 1.0]
    #[arg(short, long, allow_negative_numbers = true)]
    resolution: Option<f64>,

    /// Maximum pixels per dimension for a single request [default: 10000]
    #[arg(short, long, allow_negative_numbers = true)]
    max_pixels: Option<i64>,

    /// WCS service URL
    #[arg(long)]
    wcs_url: Option<String>,

    /// Coverage identifier on the service
    #[arg(long)]
    coverage_id: Option<String>,

    /// CRS of the bounding boxes, sent with every request [default: EPSG:25833]
    #[arg(long)]
    crs: Option<String>,

    /// Requested output format [default: GeoTIFF]
    #[arg(long)]
    format: Option<String>,

    /// Per-request timeout in seconds [default: 120]
    #[arg(long, allow_negative_numbers = true)]
    timeout: Option<f64>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show effective settings and where each value comes from
    Show,

    /// Print the settings file path
    Path,
}

fn init_logger(verbose: bool, quiet: bool) {
    let level = if quiet {
        LevelFilter::Warn
    } else if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    Builder::new()
        .target(Target::Stdout)
        .filter_level(level)
        .format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "{}", record.args())
        })
        .parse_default_env()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Fetch(args) => commands::fetch::run_fetch(args, cli.quiet),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::run_config_show(),
            ConfigAction::Path => commands::config::run_config_path(),
        },
    };

    match result {
        Ok(commands::RunStatus::Completed) => ExitCode::SUCCESS,
        Ok(commands::RunStatus::Interrupted) => ExitCode::from(EXIT_INTERRUPTED),
        Err(e) => {
            log::error!("{} {}", "\u{2718}".if_supports_color(Stdout, |t| t.red()), e);
            e.exit_code()
        }
    }
}
