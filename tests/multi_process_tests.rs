// tests/multi_process_tests.rs
// Integration tests for child-process grid execution

use tempfile::TempDir;

use gridio_bench::config::{BenchConfig, ProcessingMode};
use gridio_bench::error::ConfigError;
use gridio_bench::metrics::OpKind;
use gridio_bench::runner::Runner;

const WORKER_EXE: &str = env!("CARGO_BIN_EXE_gridio-bench");

fn config(dir: &TempDir, body: &str) -> BenchConfig {
    let yaml = format!(
        "dataset_path: {}\nprocessing_mode: processes\n{}",
        dir.path().join("mp.h5").display(),
        body
    );
    serde_yaml::from_str(&yaml).unwrap()
}

#[test]
fn test_processing_mode_deserialize() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, "");
    assert_eq!(cfg.processing_mode, ProcessingMode::Processes);

    let threads: BenchConfig = serde_yaml::from_str("dataset_path: x\n").unwrap();
    assert_eq!(threads.processing_mode, ProcessingMode::Threads);
}

#[test]
fn test_child_process_grid_round_trip() {
    let dir = TempDir::new().unwrap();
    let cfg = config(
        &dir,
        "steps: 2\narrays: 3\nrows: 4\ncols: 4\nproc_rows: 2\nproc_cols: 2\ndimensionality: 2\nslowest_axis: step\nverify: true\n",
    );

    let summary = Runner::new(cfg)
        .with_worker_exe(WORKER_EXE)
        .run_all()
        .unwrap()
        .remove(0);

    assert_eq!(summary.write.processes, 4);
    assert_eq!(summary.read.processes, 4);
    assert_eq!(summary.write.counters.transfers, 4 * 6);
    assert_eq!(summary.write.counters.objects_created, 4 * 6);
    assert_eq!(summary.read.counters.objects_opened, 4 * 6);
    assert_eq!(summary.read.counters.bytes, 4 * 6 * 4 * 4 * 8);

    // histograms survive the trip through the worker's stdout
    assert_eq!(summary.write.latencies.count(OpKind::Write), 24);
    assert_eq!(summary.read.latencies.count(OpKind::Read), 24);
    assert!(summary.write.transfer.max >= summary.write.transfer.min);
}

#[test]
fn test_child_process_strong_scaling() {
    let dir = TempDir::new().unwrap();
    let cfg = config(
        &dir,
        "steps: 1\narrays: 2\nrows: 6\ncols: 4\nproc_rows: 3\nproc_cols: 1\nscaling: strong\nverify: true\n",
    );

    let summary = Runner::new(cfg)
        .with_worker_exe(WORKER_EXE)
        .run_all()
        .unwrap()
        .remove(0);

    // one 1 x 2 x 6 x 4 dataset shared by three processes
    assert_eq!(summary.write.counters.bytes, 2 * 6 * 4 * 8);
    assert_eq!(summary.read.counters.bytes, 2 * 6 * 4 * 8);
}

#[test]
fn test_memory_backend_rejected_in_processes_mode() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, "backend: memory\n");

    let err = Runner::new(cfg).with_worker_exe(WORKER_EXE).run_all().unwrap_err();
    let config_err = err
        .chain()
        .find_map(|e| e.downcast_ref::<ConfigError>())
        .expect("config error in chain");
    assert_eq!(*config_err, ConfigError::MemoryBackendInProcesses);
}
