// -----------------------------------------------------------------------------
// gridio-bench - parallel array-storage I/O benchmark for step x array x grid datasets
// -----------------------------------------------------------------------------

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use gridio_bench::config::BenchConfig;
use gridio_bench::error::Direction;
use gridio_bench::multiprocess::run_internal_worker;
use gridio_bench::results_dir::ResultsDir;
use gridio_bench::runner::Runner;
use gridio_bench::tsv_export::{write_runs, TsvExporter};
use gridio_bench::validation::display_config_summary;

// -----------------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------------
#[derive(Parser)]
#[command(name = "gridio-bench", version, about = "Parallel array-storage I/O benchmark")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the write + read benchmark described by a config file
    ///
    /// Examples:
    ///   gridio-bench run --config weak_2x2.yaml
    ///   gridio-bench run --config sweep.yaml --dry-run
    ///   gridio-bench run --config sweep.yaml --results-tsv /tmp/sweep
    Run {
        #[arg(long)]
        config: PathBuf,

        /// Parse and validate the config, print the expanded runs, then exit
        #[arg(long)]
        dry_run: bool,

        /// Leave the dataset in place after each run
        #[arg(long)]
        keep_data: bool,

        /// Export machine-readable results to <path>-results.tsv, one row per run
        #[arg(long, value_name = "PATH")]
        results_tsv: Option<String>,

        /// Base directory for the gridio-<date>-<time>-<name>/ results directory
        #[arg(long, value_name = "DIR")]
        results_dir: Option<PathBuf>,
    },
    /// Parse and validate a config file without running it
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Child process entry point (reads the run config as JSON on stdin)
    #[command(name = "internal-worker", hide = true)]
    InternalWorker {
        #[arg(long, value_enum)]
        phase: Phase,

        #[arg(long)]
        linear_id: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Phase {
    Write,
    Read,
}

impl From<Phase> for Direction {
    fn from(p: Phase) -> Self {
        match p {
            Phase::Write => Direction::Write,
            Phase::Read => Direction::Read,
        }
    }
}

// -----------------------------------------------------------------------------
// main
// -----------------------------------------------------------------------------
fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",  // Default: only warnings and errors
        1 => "info",  // -v
        2 => "debug", // -vv
        _ => "trace", // -vvv+
    };

    // stdout carries results (and worker IPC), logs go to stderr
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::new(format!("gridio_bench={}", level));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Run {
            config,
            dry_run,
            keep_data,
            results_tsv,
            results_dir,
        } => run_cmd(&config, dry_run, keep_data, results_tsv.as_deref(), results_dir.as_deref())?,
        Commands::Validate { config } => validate_cmd(&config)?,
        Commands::InternalWorker { phase, linear_id } => {
            let mut config_json = String::new();
            std::io::stdin()
                .read_to_string(&mut config_json)
                .context("Failed to read worker config from stdin")?;
            run_internal_worker(phase.into(), linear_id, &config_json)?
        }
    }

    Ok(())
}

fn validate_cmd(config_path: &Path) -> Result<()> {
    let cfg = BenchConfig::from_file(config_path)?;
    display_config_summary(&cfg, &config_path.display().to_string());
    Ok(())
}

fn run_cmd(
    config_path: &Path,
    dry_run: bool,
    keep_data: bool,
    results_tsv: Option<&str>,
    results_dir: Option<&Path>,
) -> Result<()> {
    info!("Loading benchmark configuration from: {}", config_path.display());
    let cfg = BenchConfig::from_file(config_path)?;

    if dry_run {
        display_config_summary(&cfg, &config_path.display().to_string());
        println!("\nDry run: no data written");
        return Ok(());
    }

    let mut results = match results_dir {
        Some(base) => Some(ResultsDir::create(config_path, None, Some(base))?),
        None => None,
    };

    let t0 = Instant::now();
    let runner = Runner::new(cfg).with_keep_data(keep_data).with_progress(true);
    let summaries = runner.run_all()?;
    let elapsed = t0.elapsed().as_secs_f64();

    for summary in &summaries {
        summary.print();
        if let Some(dir) = results.as_mut() {
            dir.write_console(&summary.render())?;
        }
    }

    if let Some(base) = results_tsv {
        TsvExporter::new(base).export_runs(&summaries)?;
    }

    if let Some(mut dir) = results {
        write_runs(&dir.tsv_path(), &summaries)?;
        dir.finalize(elapsed, summaries.len())?;
        println!("\nResults saved to: {}", dir.path().display());
    }

    Ok(())
}
