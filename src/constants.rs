// src/constants.rs
//
// Central location for all constants used throughout gridio-bench
// This makes tuning and maintenance easier by having all magic numbers in one place

// =============================================================================
// Dataset Shape Defaults
// =============================================================================

/// Default number of steps (outer logical axis) if not specified
pub const DEFAULT_STEPS: u64 = 20;

/// Default number of arrays per step if not specified
pub const DEFAULT_ARRAYS: u64 = 500;

/// Default row extent of one 2D array (per process under weak scaling)
pub const DEFAULT_ROWS: u64 = 100;

/// Default column extent of one 2D array (per process under weak scaling)
pub const DEFAULT_COLS: u64 = 200;

/// Default process grid shape (single process)
pub const DEFAULT_PROC_ROWS: u64 = 1;
pub const DEFAULT_PROC_COLS: u64 = 1;

/// Default dataset dimensionality (one flat 4D dataset)
pub const DEFAULT_DIMENSIONALITY: u8 = 4;

// =============================================================================
// Storage Layout Names
// =============================================================================

/// Object name used by the flat (4D) layout
pub const FLAT_OBJECT_NAME: &str = "dataset";

/// File extension of one object in the file-backed store
pub const OBJECT_FILE_EXTENSION: &str = "gds";

/// Magic prefix of every object file header
pub const OBJECT_FILE_MAGIC: &[u8; 8] = b"GRIDIO01";

/// Maximum dimensionality an object may have
pub const MAX_OBJECT_DIMS: usize = 4;

/// Object header: magic (8) + ndims (8) + dims (4 x 8)
pub const OBJECT_HEADER_LEN: u64 = 8 + 8 + 8 * MAX_OBJECT_DIMS as u64;

/// Size of one element in the transfer buffer (f64)
pub const ELEMENT_SIZE: u64 = std::mem::size_of::<f64>() as u64;

// =============================================================================
// Metrics
// =============================================================================

/// Lowest trackable latency (microseconds)
pub const HIST_LOW_US: u64 = 1;

/// Highest trackable latency (microseconds) - one hour
pub const HIST_HIGH_US: u64 = 3_600_000_000;

/// Significant figures kept by every latency histogram
pub const HIST_SIGFIG: u8 = 3;

/// Bytes per MiB, used for data rate reporting
pub const BYTES_PER_MIB: f64 = 1_048_576.0;

// =============================================================================
// Results Output
// =============================================================================

/// Prefix of auto-created results directories: gridio-{YYYYMMDD}-{HHMM}-{name}
pub const RESULTS_DIR_PREFIX: &str = "gridio";

/// Name of the hidden subcommand used for child processes
pub const INTERNAL_WORKER_SUBCOMMAND: &str = "internal-worker";
