//! Basewise Eval CLI
//!
//! Scores recorded model outputs against their labels.

use anyhow::{Context, Result};
use basewise_eval::{load_recorded, report, BatchSource, EvalConfig, EvaluationReport, Evaluator};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tabled::settings::Style;
use tabled::Table;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "basewise-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a recording and print the tables
    Evaluate {
        /// JSON-lines file of recorded batches
        #[arg(long)]
        batches: PathBuf,

        /// YAML configuration (class names, composites, printing)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for CSV exports (overrides the configured one)
        #[arg(long)]
        export: Option<PathBuf>,

        /// Write final scores as JSON to this file
        #[arg(long)]
        json: Option<PathBuf>,

        /// Do not print tables
        #[arg(long)]
        quiet: bool,
    },

    /// Show per-batch position counts of a recording
    Summarize {
        /// JSON-lines file of recorded batches
        #[arg(long)]
        batches: PathBuf,
    },
}

fn evaluate(
    batches: &Path,
    config: Option<&Path>,
    export: Option<PathBuf>,
    json: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    let mut settings = match config {
        Some(path) => EvalConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EvalConfig::default(),
    };
    if quiet {
        settings.print_to_stdout = false;
        settings.print_every_batch = false;
    }

    let (mut source, mut model) = load_recorded(batches)?;
    let evaluator = Evaluator::from_config(&settings)?;
    let evaluation = evaluator.run(&mut source, &mut model)?;

    if let Some(dir) = export.or(settings.export_dir) {
        report::export_evaluation(&evaluation, &dir)
            .with_context(|| format!("exporting tables to {}", dir.display()))?;
    }
    if let Some(path) = json {
        let document = EvaluationReport::from_evaluation(&evaluation).to_json()?;
        std::fs::write(path, document)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "Wrote JSON report");
    }
    Ok(())
}

fn summarize(batches: &Path) -> Result<()> {
    let (source, _model) = load_recorded(batches)?;
    let stats = source.stats();

    println!("Recording: {}", batches.display());
    println!("Kind: {}", source.kind());
    println!("Batches: {}", source.len());
    println!(
        "Weighted positions: {}",
        stats.iter().map(|s| s.weighted).sum::<usize>()
    );
    if !stats.is_empty() {
        let mut table = Table::new(&stats);
        table.with(Style::ascii());
        println!("{table}");
    }
    Ok(())
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    let outcome = match cli.command {
        Commands::Evaluate {
            batches,
            config,
            export,
            json,
            quiet,
        } => {
            tracing::info!(
                batches = %batches.display(),
                config = ?config,
                export = ?export,
                "Starting evaluation"
            );
            evaluate(&batches, config.as_deref(), export, json.as_deref(), quiet)
        }
        Commands::Summarize { batches } => summarize(&batches),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
