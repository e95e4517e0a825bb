//! exam-recombiner CLI entry point

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use exam_recombiner::cli::{log_level, Cli, Commands, ExitCode, InspectArgs, RunArgs};
use exam_recombiner::{ConfigError, Pipeline, PipelineError, ProgressCallback, RecombineConfig};

/// indicatif-backed progress reporting
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg} {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for CliProgress {
    fn on_step_start(&self, step: &str) {
        self.bar.set_position(0);
        self.bar.set_length(0);
        self.bar.set_message(step.to_string());
    }

    fn on_step_progress(&self, current: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
    }

    fn on_step_complete(&self, step: &str, detail: &str) {
        self.bar.println(format!("✓ {}: {}", step, detail));
    }

    fn on_debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }
}

fn init_tracing(verbose: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<RecombineConfig, ConfigError> {
    RecombineConfig::resolve(path)
}

fn run(args: RunArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?.with_overrides(&args.overrides());
    let pipeline = Pipeline::new(config);

    let progress = CliProgress::new(args.quiet);
    let result = pipeline.run(&args.input, &args.output, &progress);
    progress.finish();
    let result = result?;

    println!(
        "{} → {} ({} units, {} images, {} pages, seed {}, {:.2}s)",
        args.input.display(),
        result.output_pdf.display(),
        result.unit_count,
        result.placed_items,
        result.output_pages,
        result.seed,
        result.elapsed_seconds
    );
    println!("Placement map: {}", result.placement_path.display());
    Ok(())
}

fn inspect(args: InspectArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let stream = Pipeline::new(config).inspect(&args.input)?;
    let json = serde_json::to_string_pretty(&stream).context("Failed to serialize detections")?;
    println!("{}", json);
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    if let Some(e) = err.downcast_ref::<PipelineError>() {
        return match e {
            PipelineError::InputNotFound(_) | PipelineError::InvalidAnnotations(_) => {
                ExitCode::InputNotFound
            }
            PipelineError::Config(_) => ExitCode::ConfigError,
            PipelineError::Layout(_) | PipelineError::Crop(_) | PipelineError::IoError(_) => {
                ExitCode::OutputError
            }
            PipelineError::ThreadPool(_) => ExitCode::GeneralError,
        };
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return ExitCode::ConfigError;
    }
    ExitCode::GeneralError
}

fn main() {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Commands::Run(args) => args.verbose,
        Commands::Inspect(args) => args.verbose,
    };
    init_tracing(verbose);

    let result = match cli.command {
        Commands::Run(args) => run(args),
        Commands::Inspect(args) => inspect(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e).code());
    }
}
