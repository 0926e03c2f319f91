// Local File Backend Integration Tests
// Full write + read runs against the one-file-per-object store
//
// These tests always run - no credentials needed for local filesystem.
// Uses temporary directories for isolation.

use tempfile::TempDir;

use gridio_bench::config::{BackendKind, BenchConfig};
use gridio_bench::runner::{run_threads, Runner, StoreProvider};
use gridio_bench::store::FileStore;

fn config(dir: &TempDir, body: &str) -> BenchConfig {
    let dataset = dir.path().join("dataset.h5");
    let yaml = format!("dataset_path: {}\n{}", dataset.display(), body);
    let cfg: BenchConfig = serde_yaml::from_str(&yaml).unwrap();
    cfg.validate().unwrap();
    cfg
}

#[test]
fn test_thread_grid_round_trip_with_verification() {
    let dir = TempDir::new().unwrap();
    let cfg = config(
        &dir,
        "steps: 3\narrays: 2\nrows: 4\ncols: 5\nproc_rows: 2\nproc_cols: 2\ndimensionality: 3\nslowest_axis: array\nverify: true\n",
    );
    let run = cfg.base_run();
    let provider = StoreProvider::for_backend(BackendKind::File);

    let (writes, reads) = run_threads(&provider, &run).unwrap();
    assert_eq!(writes.len(), 4);
    assert_eq!(reads.len(), 4);
    for w in &writes {
        assert_eq!(w.counters.transfers, 6);
        assert_eq!(w.counters.bytes, 6 * 4 * 5 * 8);
    }

    // per-array layout: one file per array
    let root = std::path::Path::new(&run.dataset_path);
    assert!(FileStore::object_file(root, "array=0").exists());
    assert!(FileStore::object_file(root, "array=1").exists());
    assert!(!FileStore::object_file(root, "array=2").exists());
}

#[test]
fn test_runner_sweep_resets_between_runs() {
    let dir = TempDir::new().unwrap();
    let cfg = config(
        &dir,
        "steps: 2\narrays: 2\nrows: 4\ncols: 4\nproc_rows: 1\nproc_cols: 2\nverify: true\nsweep:\n  dimensionalities: [4, 3, 2]\n  slowest_axes: [step, array]\n",
    );
    let dataset = cfg.dataset_path.clone();

    let summaries = Runner::new(cfg).run_all().unwrap();
    assert_eq!(summaries.len(), 6);
    for s in &summaries {
        // 2 steps x 2 arrays x 4 x 8 global doubles, whatever the layout
        assert!(s.container_bytes >= 2 * 2 * 4 * 8 * 8, "{}", s.config.label());
        assert_eq!(s.write.processes, 2);
        assert_eq!(s.read.counters.objects_created, 0);
        assert_eq!(s.write.counters.bytes, s.read.counters.bytes);
    }

    let created: Vec<u64> = summaries.iter().map(|s| s.write.counters.objects_created).collect();
    // dim=4 one dataset, dim=3 one per step or array, dim=2 one per slice (per process)
    assert_eq!(created, vec![2, 2, 4, 4, 8, 8]);

    assert!(!std::path::Path::new(&dataset).exists());
}

#[test]
fn test_keep_data_leaves_dataset() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, "steps: 1\narrays: 2\nrows: 2\ncols: 2\nkeep_data: true\n");
    let dataset = cfg.dataset_path.clone();

    let summaries = Runner::new(cfg).run_all().unwrap();
    assert_eq!(summaries.len(), 1);
    assert!(FileStore::object_file(std::path::Path::new(&dataset), "dataset").exists());
}

#[test]
fn test_stale_dataset_is_replaced() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, "steps: 1\narrays: 1\nrows: 2\ncols: 2\nverify: true\n");
    let root = std::path::PathBuf::from(&cfg.dataset_path);
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("leftover.gds"), b"junk").unwrap();

    let summary = Runner::new(cfg).with_keep_data(true).run_all().unwrap().remove(0);
    assert!(!root.join("leftover.gds").exists());
    assert_eq!(summary.read.counters.transfers, 1);
}
