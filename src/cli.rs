//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigOverrides;

/// Exit codes for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InputNotFound = 2,
    ConfigError = 3,
    OutputError = 4,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Recombine scanned exam pages into a shuffled two-column PDF
#[derive(Debug, Parser)]
#[command(name = "exam-recombiner")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Clean detections, shuffle problem sets, and write the PDF + placement map
    Run(RunArgs),
    /// Print cleaned and linked detections as JSON
    Inspect(InspectArgs),
}

/// Arguments for `run`
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Annotation JSON (array of pages with detector boxes)
    pub input: PathBuf,

    /// Output PDF path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Config file (default: <config_dir>/exam-recombiner/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Shuffle seed (overrides config)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Use a single column layout
    #[arg(long)]
    pub single_column: bool,

    /// First question number
    #[arg(long)]
    pub start_number: Option<u32>,

    /// Worker threads for detection cleanup
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

impl RunArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            seed: self.seed,
            single_column: self.single_column,
            start_number: self.start_number,
            threads: self.threads,
        }
    }
}

/// Arguments for `inspect`
#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Annotation JSON (array of pages with detector boxes)
    pub input: PathBuf,

    /// Config file (default: <config_dir>/exam-recombiner/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Default tracing filter for a `-v` count
pub fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
