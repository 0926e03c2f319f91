// src/runner.rs
//
// Grid execution: one driver per process-grid cell, write phase then read phase,
// for every run the configuration expands to.

use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::config::{BackendKind, BenchConfig, ProcessingMode, RunConfig};
use crate::decomposition::BlockDecomposition;
use crate::driver::{run_read_pass, run_write_pass};
use crate::error::Direction;
use crate::grid::ProcessCoordinate;
use crate::report::{ProcessReport, RunSummary};
use crate::store::{AccessMode, FileStore, MemoryStore, ObjectStore};
use crate::timing::PassMetrics;

/// Hands every grid process its own store instance over one shared dataset
#[derive(Debug)]
pub enum StoreProvider {
    File,
    Memory(MemoryStore),
}

impl StoreProvider {
    pub fn for_backend(backend: BackendKind) -> Self {
        match backend {
            BackendKind::File => StoreProvider::File,
            BackendKind::Memory => StoreProvider::Memory(MemoryStore::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StoreProvider::File => "file",
            StoreProvider::Memory(_) => "memory",
        }
    }

    pub fn open(&self) -> Box<dyn ObjectStore + Send> {
        match self {
            StoreProvider::File => Box::new(FileStore::new()),
            StoreProvider::Memory(shared) => Box::new(shared.share()),
        }
    }

    /// Remove whatever a previous run left at `dataset_path`
    pub fn reset(&self, dataset_path: &str) -> Result<()> {
        match self {
            StoreProvider::File => FileStore::reset(Path::new(dataset_path))
                .with_context(|| format!("Failed to reset dataset {}", dataset_path)),
            StoreProvider::Memory(shared) => {
                shared.reset(dataset_path);
                Ok(())
            }
        }
    }

    /// Bytes the dataset occupies after a write phase
    pub fn container_size(&self, dataset_path: &str) -> Result<u64> {
        let mut store = self.open();
        let container = store
            .open_container(dataset_path, AccessMode::ReadOnly)
            .with_context(|| format!("Failed to open {} for sizing", dataset_path))?;
        let size = store.container_size(container);
        store.close_container(container)?;
        Ok(size?)
    }
}

/// Run one pass for one grid process and package what it measured
pub fn execute_pass(
    store: &mut dyn ObjectStore,
    run: &RunConfig,
    coord: ProcessCoordinate,
    direction: Direction,
) -> Result<ProcessReport> {
    let mut metrics = PassMetrics::new(direction);
    let t0 = Instant::now();
    match direction {
        Direction::Write => {
            let container = run_write_pass(&mut *store, BlockDecomposition, run, coord, &mut metrics)
                .with_context(|| format!("write pass of process {}", coord.linear_id))?;
            store
                .close_container(container)
                .with_context(|| format!("close container after write pass of process {}", coord.linear_id))?;
        }
        Direction::Read => {
            run_read_pass(&mut *store, BlockDecomposition, run, coord, &mut metrics)
                .with_context(|| format!("read pass of process {}", coord.linear_id))?;
        }
    }
    let wall = t0.elapsed().as_secs_f64();
    debug!(
        "process {} {} pass: object {:.6}s transfer {:.6}s wall {:.6}s",
        coord.linear_id,
        direction,
        metrics.timing.object_secs(),
        metrics.timing.transfer_secs(),
        wall
    );
    Ok(ProcessReport::from_metrics(coord.linear_id, &metrics, wall))
}

/// Run the whole grid as threads of this process
///
/// Every thread writes, waits on a barrier until all writes are done, then
/// reads. Returns write and read reports ordered by linear id.
pub fn run_threads(provider: &StoreProvider, run: &RunConfig) -> Result<(Vec<ProcessReport>, Vec<ProcessReport>)> {
    run_grid_threads(run, || provider.open())
}

/// Thread grid over stores handed out by `open_store`, one per process
pub fn run_grid_threads<F>(run: &RunConfig, open_store: F) -> Result<(Vec<ProcessReport>, Vec<ProcessReport>)>
where
    F: Fn() -> Box<dyn ObjectStore + Send>,
{
    run.validate()?;
    let total = run.total_processes();
    info!("Starting thread grid: {} x {} = {} processes", run.proc_rows, run.proc_cols, total);

    let barrier = Arc::new(Barrier::new(total as usize));
    let (tx, rx) = mpsc::channel::<(ProcessReport, ProcessReport)>();
    let mut handles = Vec::with_capacity(total as usize);

    for linear_id in 0..total {
        let coord = ProcessCoordinate::from_linear(linear_id, run.proc_rows, run.proc_cols)?;
        let mut store = open_store();
        let run = run.clone();
        let barrier = Arc::clone(&barrier);
        let tx = tx.clone();

        let handle = thread::Builder::new()
            .name(format!("grid-{}", linear_id))
            .spawn(move || -> Result<()> {
                // a failed or panicking writer still has to release its peers
                let written = panic::catch_unwind(AssertUnwindSafe(|| {
                    execute_pass(&mut *store, &run, coord, Direction::Write)
                }))
                .unwrap_or_else(|_| Err(anyhow!("process {} panicked during its write pass", linear_id)));
                barrier.wait();
                let written = written?;
                let read = execute_pass(&mut *store, &run, coord, Direction::Read)?;
                tx.send((written, read))
                    .map_err(|e| anyhow!("process {} failed to send its reports: {}", linear_id, e))
            })
            .with_context(|| format!("Failed to spawn thread for process {}", linear_id))?;
        handles.push((linear_id, handle));
    }

    // the channel closes once every thread has dropped its sender
    drop(tx);
    let mut pairs: Vec<(ProcessReport, ProcessReport)> = rx.iter().collect();

    let mut first_failure = None;
    for (linear_id, handle) in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Process {} failed: {:#}", linear_id, e);
                first_failure.get_or_insert(e);
            }
            Err(_) => {
                error!("Process {} panicked", linear_id);
                first_failure.get_or_insert_with(|| anyhow!("process {} panicked", linear_id));
            }
        }
    }
    if let Some(e) = first_failure {
        return Err(e);
    }
    if pairs.len() != total as usize {
        bail!("expected {} process reports, collected {}", total, pairs.len());
    }

    pairs.sort_by_key(|(w, _)| w.linear_id);
    Ok(pairs.into_iter().unzip())
}

/// Executes every run of a benchmark configuration
pub struct Runner {
    cfg: BenchConfig,
    provider: StoreProvider,
    worker_exe: Option<PathBuf>,
    show_progress: bool,
}

impl Runner {
    pub fn new(cfg: BenchConfig) -> Self {
        let provider = StoreProvider::for_backend(cfg.backend);
        Self {
            cfg,
            provider,
            worker_exe: None,
            show_progress: false,
        }
    }

    /// Binary spawned for child processes (defaults to the running executable)
    pub fn with_worker_exe(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_exe = Some(path.into());
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_keep_data(mut self, keep: bool) -> Self {
        self.cfg.keep_data = self.cfg.keep_data || keep;
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.cfg
    }

    pub fn run_all(&self) -> Result<Vec<RunSummary>> {
        self.cfg.validate().context("Invalid benchmark configuration")?;
        let runs = self.cfg.runs();
        info!("Executing {} run(s) on the {} backend", runs.len(), self.provider.name());

        let pb = if self.show_progress {
            ProgressBar::new(runs.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} runs {msg}")?
                .progress_chars("#>-"),
        );

        let mut summaries = Vec::with_capacity(runs.len());
        for run in &runs {
            pb.set_message(run.label());
            let summary = self.run_one(run).with_context(|| format!("run {}", run.label()))?;
            summaries.push(summary);
            pb.inc(1);
        }
        pb.finish_and_clear();
        Ok(summaries)
    }

    /// Reset, write, read, measure, clean up
    pub fn run_one(&self, run: &RunConfig) -> Result<RunSummary> {
        run.validate()?;
        info!("Run {}: dataset {}", run.label(), run.dataset_path);
        self.provider.reset(&run.dataset_path)?;

        let (write_reports, read_reports) = match self.cfg.processing_mode {
            ProcessingMode::Threads => run_threads(&self.provider, run)?,
            ProcessingMode::Processes => {
                if matches!(self.provider, StoreProvider::Memory(_)) {
                    bail!(crate::error::ConfigError::MemoryBackendInProcesses);
                }
                let exe = match &self.worker_exe {
                    Some(path) => path.clone(),
                    None => std::env::current_exe().context("Failed to locate the worker executable")?,
                };
                crate::multiprocess::run_processes(run, &exe)?
            }
        };

        let container_bytes = self.provider.container_size(&run.dataset_path)?;
        let summary = RunSummary::new(
            run.clone(),
            self.provider.name(),
            &write_reports,
            &read_reports,
            container_bytes,
        )?;

        if self.cfg.keep_data {
            info!("Keeping dataset {}", run.dataset_path);
        } else {
            self.provider.reset(&run.dataset_path)?;
        }
        Ok(summary)
    }
}
