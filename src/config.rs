// src/config.rs
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level benchmark configuration, read from YAML.
///
/// One `BenchConfig` expands into one or more [`RunConfig`]s (see [`BenchConfig::runs`]).
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    /// Container path of the dataset. For the file backend this is a directory
    /// that holds one file per storage object.
    pub dataset_path: String,

    /// Storage engine used for the run.
    #[serde(default)]
    pub backend: BackendKind,

    /// Number of steps (logical axis 0 when the slowest axis is `step`).
    #[serde(default = "default_steps")]
    pub steps: u64,

    /// Number of arrays per step.
    #[serde(default = "default_arrays")]
    pub arrays: u64,

    /// Row extent: per-process tile under weak scaling, global extent under strong scaling.
    #[serde(default = "default_rows")]
    pub rows: u64,

    /// Column extent, same convention as `rows`.
    #[serde(default = "default_cols")]
    pub cols: u64,

    /// Process grid rows.
    #[serde(default = "default_proc_rows")]
    pub proc_rows: u64,

    /// Process grid columns.
    #[serde(default = "default_proc_cols")]
    pub proc_cols: u64,

    #[serde(default)]
    pub scaling: Scaling,

    #[serde(default)]
    pub slowest_axis: Axis,

    /// Storage dimensionality: 4 (one flat dataset), 3 (dataset per step or
    /// per array) or 2 (dataset per step and array).
    #[serde(default = "default_dimensionality")]
    pub dimensionality: Dimensionality,

    /// Fill and check buffers with deterministic values. Distorts timings.
    #[serde(default)]
    pub verify: bool,

    /// How the process grid is executed.
    #[serde(default)]
    pub processing_mode: ProcessingMode,

    /// Keep the dataset on disk after the run.
    #[serde(default)]
    pub keep_data: bool,

    /// Optional sweep over layout combinations. Overrides `dimensionality`,
    /// `slowest_axis` and `scaling` for each axis it lists.
    #[serde(default)]
    pub sweep: Option<SweepConfig>,
}

fn default_steps() -> u64 {
    crate::constants::DEFAULT_STEPS
}

fn default_arrays() -> u64 {
    crate::constants::DEFAULT_ARRAYS
}

fn default_rows() -> u64 {
    crate::constants::DEFAULT_ROWS
}

fn default_cols() -> u64 {
    crate::constants::DEFAULT_COLS
}

fn default_proc_rows() -> u64 {
    crate::constants::DEFAULT_PROC_ROWS
}

fn default_proc_cols() -> u64 {
    crate::constants::DEFAULT_PROC_COLS
}

fn default_dimensionality() -> Dimensionality {
    Dimensionality::try_from(crate::constants::DEFAULT_DIMENSIONALITY).unwrap_or(Dimensionality::Four)
}

/// Cartesian sweep over layout parameters
///
/// An empty or missing list keeps the base value for that axis.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default)]
    pub dimensionalities: Vec<Dimensionality>,

    #[serde(default)]
    pub slowest_axes: Vec<Axis>,

    #[serde(default)]
    pub scalings: Vec<Scaling>,
}

/// Storage engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One file per storage object under `dataset_path`
    #[default]
    File,
    /// In-process shared memory (threads mode only)
    Memory,
}

/// Processing mode for the process grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// One OS thread per grid cell, barrier between write and read passes
    #[default]
    Threads,

    /// One child process per grid cell, pipes for IPC
    /// Better for: kernel contention measurement, true isolation
    Processes,
}

/// Scaling mode for the row/col extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scaling {
    /// Global extent fixed at `rows x cols`; each process owns a shrinking share
    Strong,
    /// Global extent grows with the grid; each process owns a `rows x cols` tile
    #[default]
    Weak,
}

impl fmt::Display for Scaling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scaling::Strong => f.write_str("strong"),
            Scaling::Weak => f.write_str("weak"),
        }
    }
}

/// Which of step/array is the slowest-varying logical axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum Axis {
    #[default]
    Step,
    Array,
}

impl TryFrom<String> for Axis {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "step" => Ok(Axis::Step),
            "array" => Ok(Axis::Array),
            _ => Err(ConfigError::UnsupportedAxis(value)),
        }
    }
}

impl From<Axis> for String {
    fn from(axis: Axis) -> Self {
        axis.to_string()
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Step => f.write_str("step"),
            Axis::Array => f.write_str("array"),
        }
    }
}

/// Number of dimensions of each storage object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Dimensionality {
    Two,
    Three,
    Four,
}

impl TryFrom<u8> for Dimensionality {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Dimensionality::Two),
            3 => Ok(Dimensionality::Three),
            4 => Ok(Dimensionality::Four),
            other => Err(ConfigError::UnsupportedDimensionality(other)),
        }
    }
}

impl From<Dimensionality> for u8 {
    fn from(d: Dimensionality) -> Self {
        match d {
            Dimensionality::Two => 2,
            Dimensionality::Three => 3,
            Dimensionality::Four => 4,
        }
    }
}

impl fmt::Display for Dimensionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Immutable parameters of one write + read run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub dataset_path: String,
    pub dimensionality: Dimensionality,
    pub steps: u64,
    pub arrays: u64,
    pub rows: u64,
    pub cols: u64,
    pub proc_rows: u64,
    pub proc_cols: u64,
    pub scaling: Scaling,
    pub slowest_axis: Axis,
    #[serde(default)]
    pub verify: bool,
}

impl RunConfig {
    /// Rows and columns owned by one process
    pub fn local_extent(&self) -> (u64, u64) {
        match self.scaling {
            Scaling::Strong => (self.rows / self.proc_rows, self.cols / self.proc_cols),
            Scaling::Weak => (self.rows, self.cols),
        }
    }

    /// Rows and columns of one full 2D array
    pub fn global_extent(&self) -> (u64, u64) {
        match self.scaling {
            Scaling::Strong => (self.rows, self.cols),
            Scaling::Weak => (self.rows * self.proc_rows, self.cols * self.proc_cols),
        }
    }

    /// Number of cooperating processes
    pub fn total_processes(&self) -> u64 {
        self.proc_rows * self.proc_cols
    }

    /// Elements in one process's transfer buffer
    pub fn local_elements(&self) -> usize {
        let (r, c) = self.local_extent();
        (r * c) as usize
    }

    /// Bytes one process moves in a full pass
    pub fn bytes_per_pass(&self) -> u64 {
        self.steps * self.arrays * self.local_elements() as u64 * crate::constants::ELEMENT_SIZE
    }

    /// Short label used in reports, e.g. `dim=3 slowest=array scaling=weak`
    pub fn label(&self) -> String {
        format!("dim={} slowest={} scaling={}", self.dimensionality, self.slowest_axis, self.scaling)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset_path.trim().is_empty() {
            return Err(ConfigError::EmptyDatasetPath);
        }
        let extents = [
            ("steps", self.steps),
            ("arrays", self.arrays),
            ("rows", self.rows),
            ("cols", self.cols),
            ("proc_rows", self.proc_rows),
            ("proc_cols", self.proc_cols),
        ];
        for (field, value) in extents {
            if value == 0 {
                return Err(ConfigError::ZeroExtent { field });
            }
        }
        if self.scaling == Scaling::Strong {
            if self.rows % self.proc_rows != 0 {
                return Err(ConfigError::IndivisibleExtent {
                    extent_name: "rows",
                    extent: self.rows,
                    grid_name: "proc_rows",
                    grid: self.proc_rows,
                });
            }
            if self.cols % self.proc_cols != 0 {
                return Err(ConfigError::IndivisibleExtent {
                    extent_name: "cols",
                    extent: self.cols,
                    grid_name: "proc_cols",
                    grid: self.proc_cols,
                });
            }
        }
        self.check_products()
    }

    /// Every product the passes compute must fit before any of them runs
    fn check_products(&self) -> Result<(), ConfigError> {
        let overflow = |quantity| ConfigError::ExtentOverflow { quantity };
        self.proc_rows
            .checked_mul(self.proc_cols)
            .ok_or(overflow("proc_rows * proc_cols"))?;
        let (rows, cols) = match self.scaling {
            Scaling::Strong => (self.rows, self.cols),
            Scaling::Weak => (
                self.rows.checked_mul(self.proc_rows).ok_or(overflow("rows * proc_rows"))?,
                self.cols.checked_mul(self.proc_cols).ok_or(overflow("cols * proc_cols"))?,
            ),
        };
        let (local_rows, local_cols) = self.local_extent();
        let local = local_rows
            .checked_mul(local_cols)
            .and_then(|n| n.checked_mul(crate::constants::ELEMENT_SIZE))
            .ok_or(overflow("per-process buffer bytes"))?;
        usize::try_from(local).map_err(|_| overflow("per-process buffer bytes"))?;
        self.steps
            .checked_mul(self.arrays)
            .and_then(|n| n.checked_mul(local))
            .ok_or(overflow("bytes per pass"))?;
        self.steps
            .checked_mul(self.arrays)
            .and_then(|n| n.checked_mul(rows))
            .and_then(|n| n.checked_mul(cols))
            .and_then(|n| n.checked_mul(crate::constants::ELEMENT_SIZE))
            .ok_or(overflow("dataset bytes"))?;
        Ok(())
    }
}

impl BenchConfig {
    /// Read and validate a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let buf = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: BenchConfig =
            serde_yaml::from_slice(&buf).with_context(|| format!("parse {}", path.display()))?;
        cfg.validate().with_context(|| format!("validate {}", path.display()))?;
        Ok(cfg)
    }

    /// The base run, ignoring any sweep
    pub fn base_run(&self) -> RunConfig {
        RunConfig {
            dataset_path: self.dataset_path.clone(),
            dimensionality: self.dimensionality,
            steps: self.steps,
            arrays: self.arrays,
            rows: self.rows,
            cols: self.cols,
            proc_rows: self.proc_rows,
            proc_cols: self.proc_cols,
            scaling: self.scaling,
            slowest_axis: self.slowest_axis,
            verify: self.verify,
        }
    }

    /// Expand the sweep into concrete runs
    ///
    /// Nesting order: dimensionality, then slowest axis, then scaling.
    pub fn runs(&self) -> Vec<RunConfig> {
        let base = self.base_run();
        let Some(sweep) = &self.sweep else {
            return vec![base];
        };

        let dims = non_empty_or(&sweep.dimensionalities, base.dimensionality);
        let axes = non_empty_or(&sweep.slowest_axes, base.slowest_axis);
        let scalings = non_empty_or(&sweep.scalings, base.scaling);

        let mut runs = Vec::with_capacity(dims.len() * axes.len() * scalings.len());
        for &dimensionality in &dims {
            for &slowest_axis in &axes {
                for &scaling in &scalings {
                    runs.push(RunConfig {
                        dimensionality,
                        slowest_axis,
                        scaling,
                        ..base.clone()
                    });
                }
            }
        }
        runs
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == BackendKind::Memory && self.processing_mode == ProcessingMode::Processes {
            return Err(ConfigError::MemoryBackendInProcesses);
        }
        for run in self.runs() {
            run.validate()?;
        }
        Ok(())
    }
}

fn non_empty_or<T: Copy>(values: &[T], fallback: T) -> Vec<T> {
    if values.is_empty() {
        vec![fallback]
    } else {
        values.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
dataset_path: /tmp/gridio/test
steps: 2
arrays: 3
rows: 4
cols: 6
"#
    }

    #[test]
    fn test_defaults() {
        let cfg: BenchConfig = serde_yaml::from_str("dataset_path: /tmp/x\n").unwrap();
        assert_eq!(cfg.steps, crate::constants::DEFAULT_STEPS);
        assert_eq!(cfg.arrays, crate::constants::DEFAULT_ARRAYS);
        assert_eq!(cfg.dimensionality, Dimensionality::Four);
        assert_eq!(cfg.slowest_axis, Axis::Step);
        assert_eq!(cfg.scaling, Scaling::Weak);
        assert_eq!(cfg.backend, BackendKind::File);
        assert_eq!(cfg.processing_mode, ProcessingMode::Threads);
        assert!(!cfg.verify);
    }

    #[test]
    fn test_parse_minimal() {
        let cfg: BenchConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert!(cfg.validate().is_ok());
        let runs = cfg.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].steps, 2);
        assert_eq!(runs[0].local_extent(), (4, 6));
    }

    #[test]
    fn test_unsupported_dimensionality_rejected() {
        let yaml = "dataset_path: /tmp/x\ndimensionality: 1\n";
        let err = serde_yaml::from_str::<BenchConfig>(yaml).unwrap_err();
        assert!(err.to_string().contains("unsupported dimensionality 1"), "{}", err);

        assert_eq!(
            Dimensionality::try_from(5u8).unwrap_err(),
            ConfigError::UnsupportedDimensionality(5)
        );
    }

    #[test]
    fn test_unsupported_axis_rejected() {
        let yaml = "dataset_path: /tmp/x\nslowest_axis: row\n";
        let err = serde_yaml::from_str::<BenchConfig>(yaml).unwrap_err();
        assert!(err.to_string().contains("unsupported slowest axis"), "{}", err);
    }

    #[test]
    fn test_axis_case_insensitive() {
        let yaml = "dataset_path: /tmp/x\nslowest_axis: Array\n";
        let cfg: BenchConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.slowest_axis, Axis::Array);
    }

    #[test]
    fn test_extents_by_scaling() {
        let mut run: RunConfig = serde_yaml::from_str::<BenchConfig>(minimal_yaml()).unwrap().base_run();
        run.proc_rows = 2;
        run.proc_cols = 3;

        run.scaling = Scaling::Weak;
        assert_eq!(run.local_extent(), (4, 6));
        assert_eq!(run.global_extent(), (8, 18));

        run.scaling = Scaling::Strong;
        assert_eq!(run.local_extent(), (2, 2));
        assert_eq!(run.global_extent(), (4, 6));
        assert_eq!(run.total_processes(), 6);
    }

    #[test]
    fn test_strong_scaling_requires_divisible_extent() {
        let mut run = serde_yaml::from_str::<BenchConfig>(minimal_yaml()).unwrap().base_run();
        run.scaling = Scaling::Strong;
        run.proc_rows = 3;
        assert!(matches!(
            run.validate(),
            Err(ConfigError::IndivisibleExtent { extent_name: "rows", .. })
        ));
    }

    #[test]
    fn test_zero_extent_rejected() {
        let mut run = serde_yaml::from_str::<BenchConfig>(minimal_yaml()).unwrap().base_run();
        run.arrays = 0;
        assert_eq!(run.validate(), Err(ConfigError::ZeroExtent { field: "arrays" }));
    }

    #[test]
    fn test_overflowing_extents_rejected() {
        let base = serde_yaml::from_str::<BenchConfig>(minimal_yaml()).unwrap().base_run();

        let mut run = base.clone();
        run.rows = 1 << 40;
        run.proc_rows = 1 << 30;
        assert_eq!(run.validate(), Err(ConfigError::ExtentOverflow { quantity: "rows * proc_rows" }));

        let mut run = base.clone();
        run.proc_rows = 1 << 32;
        run.proc_cols = 1 << 32;
        assert_eq!(
            run.validate(),
            Err(ConfigError::ExtentOverflow { quantity: "proc_rows * proc_cols" })
        );

        let mut run = base.clone();
        run.rows = 1 << 31;
        run.cols = 1 << 31;
        assert_eq!(
            run.validate(),
            Err(ConfigError::ExtentOverflow { quantity: "per-process buffer bytes" })
        );

        let mut run = base.clone();
        run.steps = 1 << 40;
        run.arrays = 1 << 20;
        assert_eq!(run.validate(), Err(ConfigError::ExtentOverflow { quantity: "bytes per pass" }));

        // strong scaling never multiplies rows by the grid
        let mut run = base;
        run.scaling = Scaling::Strong;
        run.rows = 1 << 40;
        run.proc_rows = 1 << 30;
        run.cols = 6;
        run.proc_cols = 1;
        assert!(run.validate().is_ok());
    }

    #[test]
    fn test_memory_backend_requires_threads() {
        let yaml = "dataset_path: /tmp/x\nbackend: memory\nprocessing_mode: processes\n";
        let cfg: BenchConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.validate(), Err(ConfigError::MemoryBackendInProcesses));
    }

    #[test]
    fn test_sweep_expansion_order() {
        let yaml = r#"
dataset_path: /tmp/x
sweep:
  dimensionalities: [4, 3, 2]
  slowest_axes: [step, array]
"#;
        let cfg: BenchConfig = serde_yaml::from_str(yaml).unwrap();
        let runs = cfg.runs();
        assert_eq!(runs.len(), 6);
        assert_eq!((runs[0].dimensionality, runs[0].slowest_axis), (Dimensionality::Four, Axis::Step));
        assert_eq!((runs[1].dimensionality, runs[1].slowest_axis), (Dimensionality::Four, Axis::Array));
        assert_eq!((runs[5].dimensionality, runs[5].slowest_axis), (Dimensionality::Two, Axis::Array));
        assert!(runs.iter().all(|r| r.scaling == Scaling::Weak));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "dataset_path: /tmp/x\nstep_count: 3\n";
        assert!(serde_yaml::from_str::<BenchConfig>(yaml).is_err());
    }

    #[test]
    fn test_bytes_per_pass() {
        let run = serde_yaml::from_str::<BenchConfig>(minimal_yaml()).unwrap().base_run();
        assert_eq!(run.bytes_per_pass(), 2 * 3 * 4 * 6 * 8);
    }
}
