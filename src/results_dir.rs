//! Results directory management for gridio-bench
//!
//! Automatically creates structured output directories containing:
//! - TSV results, one row per run
//! - Console output log
//! - Configuration file copy
//! - Run metadata (JSON)
//!
//! Directory format: gridio-{YYYYMMDD}-{HHMM}-{test_name}/

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::constants::RESULTS_DIR_PREFIX;

/// Metadata about a benchmark invocation
#[derive(Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub test_name: String,
    pub config_path: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_secs: Option<f64>,
    pub command_line: Vec<String>,
    pub hostname: String,
    /// Runs the sweep expanded to
    pub runs: usize,
}

impl RunMetadata {
    pub fn new(test_name: String, config_path: String) -> Self {
        let hostname = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            test_name,
            config_path,
            start_time: Local::now().to_rfc3339(),
            end_time: None,
            duration_secs: None,
            command_line: std::env::args().collect(),
            hostname,
            runs: 0,
        }
    }

    pub fn finalize(&mut self, duration_secs: f64, runs: usize) {
        self.end_time = Some(Local::now().to_rfc3339());
        self.duration_secs = Some(duration_secs);
        self.runs = runs;
    }
}

/// Results directory manager
pub struct ResultsDir {
    path: PathBuf,
    metadata: RunMetadata,
    console_log: Option<fs::File>,
}

impl ResultsDir {
    /// Create a results directory named after the config file
    ///
    /// `base_dir` defaults to the current directory.
    pub fn create(config_path: &Path, custom_name: Option<&str>, base_dir: Option<&Path>) -> Result<Self> {
        let test_name = match custom_name {
            Some(name) => name.to_string(),
            None => config_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("test")
                .to_string(),
        };

        let dir_name = format!(
            "{}-{}-{}",
            RESULTS_DIR_PREFIX,
            Local::now().format("%Y%m%d-%H%M"),
            test_name
        );
        let dir_path = base_dir.unwrap_or_else(|| Path::new(".")).join(dir_name);

        fs::create_dir_all(&dir_path)
            .with_context(|| format!("Failed to create results directory: {}", dir_path.display()))?;

        fs::copy(config_path, dir_path.join("config.yaml"))
            .context("Failed to copy config to results directory")?;

        let metadata = RunMetadata::new(test_name, config_path.to_string_lossy().to_string());

        let console_log =
            fs::File::create(dir_path.join("console.log")).context("Failed to create console.log")?;

        tracing::info!("Created results directory: {}", dir_path.display());

        Ok(Self {
            path: dir_path,
            metadata,
            console_log: Some(console_log),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tsv_path(&self) -> PathBuf {
        self.path.join("results.tsv")
    }

    pub fn console_log_path(&self) -> PathBuf {
        self.path.join("console.log")
    }

    /// Append to console.log
    pub fn write_console(&mut self, text: &str) -> Result<()> {
        if let Some(ref mut log) = self.console_log {
            writeln!(log, "{}", text).context("Failed to write to console.log")?;
        }
        Ok(())
    }

    pub fn write_metadata(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.metadata).context("Failed to serialize metadata")?;
        fs::write(self.path.join("metadata.json"), json).context("Failed to write metadata.json")?;
        Ok(())
    }

    /// Write final metadata and close the console log
    pub fn finalize(&mut self, duration_secs: f64, runs: usize) -> Result<()> {
        self.metadata.finalize(duration_secs, runs);
        self.write_metadata()?;

        if let Some(mut log) = self.console_log.take() {
            log.flush()?;
        }

        tracing::info!("Results saved to: {}", self.path.display());
        Ok(())
    }
}
