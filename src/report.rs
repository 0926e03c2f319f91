//! Per-process pass reports and their aggregation into run summaries

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::config::RunConfig;
use crate::constants::BYTES_PER_MIB;
use crate::error::Direction;
use crate::metrics::OpLatencies;
use crate::timing::{PassCounters, PassMetrics};

/// What one grid process measured during one pass
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub linear_id: u64,
    pub direction: Direction,
    pub object_secs: f64,
    pub transfer_secs: f64,
    pub wall_secs: f64,
    pub counters: PassCounters,
    pub latencies: OpLatencies,
}

impl ProcessReport {
    pub fn from_metrics(linear_id: u64, metrics: &PassMetrics, wall_secs: f64) -> Self {
        Self {
            linear_id,
            direction: metrics.direction,
            object_secs: metrics.timing.object_secs(),
            transfer_secs: metrics.timing.transfer_secs(),
            wall_secs,
            counters: metrics.counters.clone(),
            latencies: metrics.latencies.clone(),
        }
    }
}

/// [`ProcessReport`] in the form a worker prints on stdout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcProcessReport {
    pub linear_id: u64,
    pub direction: Direction,
    pub object_secs: f64,
    pub transfer_secs: f64,
    pub wall_secs: f64,
    pub counters: PassCounters,
    /// Base64 HDR V2 histograms, one per `OpKind`
    pub latencies: Vec<String>,
}

impl TryFrom<&ProcessReport> for IpcProcessReport {
    type Error = anyhow::Error;

    fn try_from(report: &ProcessReport) -> Result<Self> {
        Ok(Self {
            linear_id: report.linear_id,
            direction: report.direction,
            object_secs: report.object_secs,
            transfer_secs: report.transfer_secs,
            wall_secs: report.wall_secs,
            counters: report.counters.clone(),
            latencies: report.latencies.serialize()?,
        })
    }
}

impl TryFrom<IpcProcessReport> for ProcessReport {
    type Error = anyhow::Error;

    fn try_from(ipc: IpcProcessReport) -> Result<Self> {
        let latencies = OpLatencies::deserialize(&ipc.latencies)
            .with_context(|| format!("latencies of process {}", ipc.linear_id))?;
        Ok(Self {
            linear_id: ipc.linear_id,
            direction: ipc.direction,
            object_secs: ipc.object_secs,
            transfer_secs: ipc.transfer_secs,
            wall_secs: ipc.wall_secs,
            counters: ipc.counters,
            latencies,
        })
    }
}

/// min / max / mean of one timing bucket across processes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl BucketStats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Self { min, max, mean }
    }
}

/// One pass aggregated over every process of the grid
#[derive(Debug, Clone)]
pub struct PassSummary {
    pub direction: Direction,
    pub processes: usize,
    pub object: BucketStats,
    pub transfer: BucketStats,
    /// Slowest process, start of pass to end of pass
    pub wall_secs: f64,
    pub counters: PassCounters,
    pub latencies: OpLatencies,
}

impl PassSummary {
    pub fn from_reports(direction: Direction, reports: &[ProcessReport]) -> Result<Self> {
        if reports.is_empty() {
            bail!("no {} reports to summarize", direction);
        }
        if let Some(stray) = reports.iter().find(|r| r.direction != direction) {
            bail!(
                "process {} reported a {} pass where a {} pass was expected",
                stray.linear_id,
                stray.direction,
                direction
            );
        }

        let object: Vec<f64> = reports.iter().map(|r| r.object_secs).collect();
        let transfer: Vec<f64> = reports.iter().map(|r| r.transfer_secs).collect();
        let mut counters = PassCounters::default();
        let mut latencies = OpLatencies::new();
        for r in reports {
            counters.merge(&r.counters);
            latencies.merge(&r.latencies);
        }

        Ok(Self {
            direction,
            processes: reports.len(),
            object: BucketStats::from_values(&object),
            transfer: BucketStats::from_values(&transfer),
            wall_secs: reports.iter().map(|r| r.wall_secs).fold(0.0, f64::max),
            counters,
            latencies,
        })
    }

    pub fn mib(&self) -> f64 {
        self.counters.bytes as f64 / BYTES_PER_MIB
    }

    /// Aggregate rate over the slowest process's transfer time
    pub fn transfer_mib_per_sec(&self) -> f64 {
        rate(self.mib(), self.transfer.max)
    }

    /// Aggregate rate over the whole pass
    pub fn wall_mib_per_sec(&self) -> f64 {
        rate(self.mib(), self.wall_secs)
    }
}

fn rate(mib: f64, secs: f64) -> f64 {
    if secs > 0.0 {
        mib / secs
    } else {
        0.0
    }
}

/// Write + read results of one run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub config: RunConfig,
    pub backend: String,
    pub write: PassSummary,
    pub read: PassSummary,
    pub container_bytes: u64,
}

impl RunSummary {
    pub fn new(
        config: RunConfig,
        backend: &str,
        write_reports: &[ProcessReport],
        read_reports: &[ProcessReport],
        container_bytes: u64,
    ) -> Result<Self> {
        Ok(Self {
            config,
            backend: backend.to_string(),
            write: PassSummary::from_reports(Direction::Write, write_reports)?,
            read: PassSummary::from_reports(Direction::Read, read_reports)?,
            container_bytes,
        })
    }

    /// Human-readable summary, one line per entry
    pub fn render(&self) -> String {
        let c = &self.config;
        let (rows, cols) = c.global_extent();
        let (local_rows, local_cols) = c.local_extent();
        let mut out = String::new();
        let _ = writeln!(out, "=== {} ===", c.label());
        let _ = writeln!(
            out,
            "dataset {} ({} backend): {} steps x {} arrays x {} x {}, grid {} x {}, tile {} x {}",
            c.dataset_path, self.backend, c.steps, c.arrays, rows, cols, c.proc_rows, c.proc_cols, local_rows, local_cols
        );
        if c.verify {
            let _ = writeln!(out, "data verification enabled: timings are distorted");
        }
        let _ = writeln!(
            out,
            "container size: {} bytes ({:.2} MiB)",
            self.container_bytes,
            self.container_bytes as f64 / BYTES_PER_MIB
        );
        for pass in [&self.write, &self.read] {
            let _ = writeln!(
                out,
                "{:<5} object   s: min {:>10.6} max {:>10.6} mean {:>10.6}",
                pass.direction.to_string().to_uppercase(),
                pass.object.min,
                pass.object.max,
                pass.object.mean
            );
            let _ = writeln!(
                out,
                "{:<5} transfer s: min {:>10.6} max {:>10.6} mean {:>10.6}",
                "",
                pass.transfer.min,
                pass.transfer.max,
                pass.transfer.mean
            );
            let _ = writeln!(
                out,
                "{:<5} wall {:.6}s  {:.2} MiB  {:.2} MiB/s (transfer)  {:.2} MiB/s (wall)  objects: {} created {} opened {} reused",
                "",
                pass.wall_secs,
                pass.mib(),
                pass.transfer_mib_per_sec(),
                pass.wall_mib_per_sec(),
                pass.counters.objects_created,
                pass.counters.objects_opened,
                pass.counters.objects_reused
            );
        }
        out
    }

    pub fn print(&self) {
        println!("\n{}", self.render());
        self.write.latencies.print_summary("WRITE");
        self.read.latencies.print_summary("READ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Axis, Dimensionality, Scaling};
    use crate::metrics::OpKind;
    use std::time::Duration;

    fn report(linear_id: u64, direction: Direction, object_secs: f64, transfer_secs: f64) -> ProcessReport {
        let mut latencies = OpLatencies::new();
        latencies.record(OpKind::Write, Duration::from_micros(10 + linear_id));
        ProcessReport {
            linear_id,
            direction,
            object_secs,
            transfer_secs,
            wall_secs: object_secs + transfer_secs,
            counters: PassCounters {
                transfers: 4,
                bytes: 4 * BYTES_PER_MIB as u64,
                ..Default::default()
            },
            latencies,
        }
    }

    fn run_config() -> RunConfig {
        RunConfig {
            dataset_path: "x".into(),
            dimensionality: Dimensionality::Four,
            steps: 2,
            arrays: 2,
            rows: 4,
            cols: 4,
            proc_rows: 1,
            proc_cols: 2,
            scaling: Scaling::Weak,
            slowest_axis: Axis::Step,
            verify: false,
        }
    }

    #[test]
    fn test_bucket_stats() {
        let s = BucketStats::from_values(&[1.0, 3.0, 2.0]);
        assert_eq!(s, BucketStats { min: 1.0, max: 3.0, mean: 2.0 });
        assert_eq!(BucketStats::from_values(&[]), BucketStats::default());
    }

    #[test]
    fn test_pass_summary_aggregates() {
        let reports = vec![report(0, Direction::Write, 0.5, 1.0), report(1, Direction::Write, 0.25, 2.0)];
        let s = PassSummary::from_reports(Direction::Write, &reports).unwrap();
        assert_eq!(s.processes, 2);
        assert_eq!(s.object.max, 0.5);
        assert_eq!(s.transfer.mean, 1.5);
        assert_eq!(s.wall_secs, 2.25);
        assert_eq!(s.counters.transfers, 8);
        assert_eq!(s.latencies.count(OpKind::Write), 2);
        // 8 MiB over the slowest transfer of 2s
        assert_eq!(s.transfer_mib_per_sec(), 4.0);
    }

    #[test]
    fn test_pass_summary_rejects_mixed_directions() {
        let reports = vec![report(0, Direction::Write, 0.1, 0.1), report(1, Direction::Read, 0.1, 0.1)];
        assert!(PassSummary::from_reports(Direction::Write, &reports).is_err());
        assert!(PassSummary::from_reports(Direction::Read, &[]).is_err());
    }

    #[test]
    fn test_ipc_report_round_trip() {
        let original = report(3, Direction::Read, 0.125, 0.5);
        let ipc = IpcProcessReport::try_from(&original).unwrap();
        let json = serde_json::to_string(&ipc).unwrap();
        assert!(json.starts_with('{'));
        let back = ProcessReport::try_from(serde_json::from_str::<IpcProcessReport>(&json).unwrap()).unwrap();
        assert_eq!(back.linear_id, 3);
        assert_eq!(back.direction, Direction::Read);
        assert_eq!(back.counters, original.counters);
        assert_eq!(back.latencies.count(OpKind::Write), 1);
    }

    #[test]
    fn test_render_mentions_both_passes() {
        let w = vec![report(0, Direction::Write, 0.1, 0.2), report(1, Direction::Write, 0.1, 0.2)];
        let r = vec![report(0, Direction::Read, 0.1, 0.2), report(1, Direction::Read, 0.1, 0.2)];
        let summary = RunSummary::new(run_config(), "memory", &w, &r, 512).unwrap();
        let text = summary.render();
        assert!(text.contains("dim=4 slowest=step scaling=weak"));
        assert!(text.contains("WRITE"));
        assert!(text.contains("READ"));
        assert!(text.contains("512 bytes"));
    }
}
