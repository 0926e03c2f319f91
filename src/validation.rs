// Configuration validation and summary display
// Used by `run --dry-run` and `validate`

use std::fmt::Write as _;

use crate::config::BenchConfig;
use crate::constants::BYTES_PER_MIB;
use crate::layout::Layout;

/// Print the parsed configuration and every run it expands to
pub fn display_config_summary(config: &BenchConfig, config_path: &str) {
    print!("{}", config_summary(config, config_path));
}

/// Text behind [`display_config_summary`]
pub fn config_summary(config: &BenchConfig, config_path: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "╔═══════════════════════════════════════════════════════════════════════╗");
    let _ = writeln!(out, "║           CONFIGURATION VALIDATION & TEST SUMMARY                    ║");
    let _ = writeln!(out, "╚═══════════════════════════════════════════════════════════════════════╝");
    let _ = writeln!(out);
    let _ = writeln!(out, "✅ Config file parsed successfully: {}", config_path);
    let _ = writeln!(out);

    let _ = writeln!(out, "┌─ Test Configuration ─────────────────────────────────────────────────┐");
    let _ = writeln!(out, "│ Dataset:      {}", config.dataset_path);
    let _ = writeln!(out, "│ Backend:      {:?}", config.backend);
    let _ = writeln!(out, "│ Mode:         {:?}", config.processing_mode);
    let _ = writeln!(out, "│ Steps:        {}", config.steps);
    let _ = writeln!(out, "│ Arrays:       {}", config.arrays);
    let _ = writeln!(out, "│ Rows x Cols:  {} x {}", config.rows, config.cols);
    let _ = writeln!(
        out,
        "│ Grid:         {} x {} = {} processes",
        config.proc_rows,
        config.proc_cols,
        config.proc_rows * config.proc_cols
    );
    let _ = writeln!(
        out,
        "│ Verify:       {}",
        if config.verify { "✅ YES (timings distorted)" } else { "❌ NO" }
    );
    let _ = writeln!(out, "│ Keep data:    {}", config.keep_data);
    let _ = writeln!(out, "└──────────────────────────────────────────────────────────────────────┘");
    let _ = writeln!(out);

    let runs = config.runs();
    let _ = writeln!(out, "┌─ Runs ({}) ──────────────────────────────────────────────────────────┐", runs.len());
    for (idx, run) in runs.iter().enumerate() {
        let layout = Layout::for_run(run);
        let (rows, cols) = run.global_extent();
        let (local_rows, local_cols) = run.local_extent();
        let total_bytes = run.bytes_per_pass() * run.total_processes();
        let _ = writeln!(out, "│ {:>3}. {}", idx + 1, run.label());
        let _ = writeln!(out, "│      Layout:     {}", layout);
        let _ = writeln!(out, "│      Object:     {:?}", layout.object_shape(run));
        let _ = writeln!(
            out,
            "│      Array:      {} x {} (tile {} x {} per process)",
            rows, cols, local_rows, local_cols
        );
        let _ = writeln!(
            out,
            "│      Data/pass:  {} bytes ({:.2} MiB)",
            total_bytes,
            total_bytes as f64 / BYTES_PER_MIB
        );
    }
    let _ = writeln!(out, "└──────────────────────────────────────────────────────────────────────┘");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lists_every_run() {
        let yaml = r#"
dataset_path: /tmp/gridio/summary
steps: 2
arrays: 3
rows: 4
cols: 4
proc_rows: 2
proc_cols: 1
sweep:
  dimensionalities: [4, 2]
  slowest_axes: [step, array]
"#;
        let cfg: BenchConfig = serde_yaml::from_str(yaml).unwrap();
        let text = config_summary(&cfg, "summary.yaml");

        assert!(text.contains("summary.yaml"));
        assert!(text.contains("Runs (4)"));
        assert!(text.contains("dim=4 slowest=step scaling=weak"));
        assert!(text.contains("dim=2 slowest=array scaling=weak"));
        assert!(text.contains("Object:     [2, 3, 8, 4]"));
        assert!(text.contains("Array:      8 x 4 (tile 4 x 4 per process)"));
    }
}
