//! TSV export for machine-readable benchmark results

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::metrics::OpKind;
use crate::report::{PassSummary, RunSummary};

const HEADER: &str = "dimensionality\tslowest_axis\tscaling\tbackend\tsteps\tarrays\trows\tcols\tproc_rows\tproc_cols\tverify\tcontainer_bytes\t\
write_object_min_s\twrite_object_max_s\twrite_object_mean_s\twrite_transfer_min_s\twrite_transfer_max_s\twrite_transfer_mean_s\twrite_wall_s\twrite_mib\twrite_mibps\twrite_p99_us\t\
read_object_min_s\tread_object_max_s\tread_object_mean_s\tread_transfer_min_s\tread_transfer_max_s\tread_transfer_mean_s\tread_wall_s\tread_mib\tread_mibps\tread_p99_us";

/// TSV exporter for benchmark results
pub struct TsvExporter {
    basename: String,
}

impl TsvExporter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            basename: path.as_ref().to_string_lossy().to_string(),
        }
    }

    /// Export every run to `<basename>-results.tsv`
    pub fn export_runs(&self, runs: &[RunSummary]) -> Result<()> {
        let path = format!("{}-results.tsv", self.basename);
        write_runs(Path::new(&path), runs)?;
        println!("\n✅ TSV results exported to: {}", path);
        Ok(())
    }
}

/// Write one header line and one row per run to `path`
pub fn write_runs(path: &Path, runs: &[RunSummary]) -> Result<()> {
    let mut f = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    writeln!(f, "{}", HEADER)?;
    for run in runs {
        writeln!(f, "{}", row(run))?;
    }
    Ok(())
}

fn row(run: &RunSummary) -> String {
    let c = &run.config;
    let mut fields = vec![
        c.dimensionality.to_string(),
        c.slowest_axis.to_string(),
        c.scaling.to_string(),
        run.backend.clone(),
        c.steps.to_string(),
        c.arrays.to_string(),
        c.rows.to_string(),
        c.cols.to_string(),
        c.proc_rows.to_string(),
        c.proc_cols.to_string(),
        c.verify.to_string(),
        run.container_bytes.to_string(),
    ];
    pass_fields(&mut fields, &run.write, OpKind::Write);
    pass_fields(&mut fields, &run.read, OpKind::Read);
    fields.join("\t")
}

fn pass_fields(fields: &mut Vec<String>, pass: &PassSummary, transfer_op: OpKind) {
    let p99 = pass.latencies.histogram(transfer_op).value_at_quantile(0.99);
    fields.extend([
        format!("{:.6}", pass.object.min),
        format!("{:.6}", pass.object.max),
        format!("{:.6}", pass.object.mean),
        format!("{:.6}", pass.transfer.min),
        format!("{:.6}", pass.transfer.max),
        format!("{:.6}", pass.transfer.mean),
        format!("{:.6}", pass.wall_secs),
        format!("{:.2}", pass.mib()),
        format!("{:.2}", pass.transfer_mib_per_sec()),
        p99.to_string(),
    ]);
}
