// src/multiprocess.rs
//
// Child-process grid execution
// Spawns one child per grid cell; all write children finish before any read child starts

use anyhow::{bail, Context, Result};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tracing::{error, info};

use crate::config::RunConfig;
use crate::constants::INTERNAL_WORKER_SUBCOMMAND;
use crate::error::Direction;
use crate::grid::ProcessCoordinate;
use crate::report::{IpcProcessReport, ProcessReport};
use crate::runner::execute_pass;
use crate::store::FileStore;

/// Run the grid as child processes of `worker_exe`
///
/// Returns write and read reports ordered by linear id.
pub fn run_processes(run: &RunConfig, worker_exe: &Path) -> Result<(Vec<ProcessReport>, Vec<ProcessReport>)> {
    run.validate()?;
    info!(
        "Starting multi-process execution: {} x {} = {} processes",
        run.proc_rows,
        run.proc_cols,
        run.total_processes()
    );
    let writes = run_phase(run, worker_exe, Direction::Write)?;
    let reads = run_phase(run, worker_exe, Direction::Read)?;
    Ok((writes, reads))
}

/// Spawn every child of one phase, then collect them all
fn run_phase(run: &RunConfig, worker_exe: &Path, phase: Direction) -> Result<Vec<ProcessReport>> {
    let config_json = serde_json::to_string(run).context("Failed to serialize run config")?;

    let mut children = Vec::with_capacity(run.total_processes() as usize);
    for linear_id in 0..run.total_processes() {
        let mut cmd = Command::new(worker_exe);
        cmd.arg(INTERNAL_WORKER_SUBCOMMAND)
            .arg("--phase")
            .arg(phase.to_string())
            .arg("--linear-id")
            .arg(linear_id.to_string());

        cmd.stdin(Stdio::piped())   // Run config JSON goes here
            .stdout(Stdio::piped())  // ProcessReport JSON comes back
            .stderr(Stdio::inherit()); // Child logs go to parent stderr

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {} child {}", phase, linear_id))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(config_json.as_bytes())
                .context("Failed to write config to child stdin")?;
            stdin.flush()?;
        }
        children.push((linear_id, child));
    }

    // wait for every child even after a failure so none is left running
    let mut reports = Vec::with_capacity(children.len());
    let mut first_failure = None;
    for (linear_id, child) in children {
        match collect_child(linear_id, child) {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!("{} child {} failed: {:#}", phase, linear_id, e);
                first_failure.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_failure {
        return Err(e.context(format!("{} phase failed", phase)));
    }

    reports.sort_by_key(|r| r.linear_id);
    info!("All {} {} children completed", reports.len(), phase);
    Ok(reports)
}

fn collect_child(linear_id: u64, mut child: Child) -> Result<ProcessReport> {
    let stdout = child.stdout.take().context("Failed to capture child stdout")?;

    let mut json_line = String::new();
    for line in BufReader::new(stdout).lines() {
        let line = line.context("Failed to read from child stdout")?;
        if line.starts_with('{') {
            json_line = line;
            break;
        }
    }

    let status = child
        .wait()
        .with_context(|| format!("Failed to wait for child {}", linear_id))?;
    if !status.success() {
        bail!("Child process {} exited with status: {:?}", linear_id, status);
    }
    if json_line.is_empty() {
        bail!("Child process {} produced no JSON output", linear_id);
    }

    let ipc: IpcProcessReport = serde_json::from_str(&json_line)
        .with_context(|| format!("Failed to parse JSON from child {}", linear_id))?;
    if ipc.linear_id != linear_id {
        bail!("Child {} reported as process {}", linear_id, ipc.linear_id);
    }
    ProcessReport::try_from(ipc)
}

/// Internal worker mode: run one pass for one grid cell and print its report as JSON
pub fn run_internal_worker(phase: Direction, linear_id: u64, config_json: &str) -> Result<()> {
    let run: RunConfig = serde_json::from_str(config_json).context("Failed to parse worker config")?;
    let coord = ProcessCoordinate::from_linear(linear_id, run.proc_rows, run.proc_cols)?;

    let mut store = FileStore::new();
    let report = execute_pass(&mut store, &run, coord, phase)?;

    let ipc = IpcProcessReport::try_from(&report)?;
    let json = serde_json::to_string(&ipc).context("Failed to serialize report")?;

    // Parent reads this line
    println!("{}", json);
    Ok(())
}
